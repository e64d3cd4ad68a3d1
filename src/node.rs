//! Miner-node wiring
//!
//! The consensus-side loop in miniature: drain the pool, package a block,
//! commit it to the fork tree, and hand out per-bundle inclusion proofs
//! so every affected account can run its VPB update. Transport between
//! the node and accounts is the caller's business.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use ezchain_chain::{validate_block_payload, Block, Blockchain, ChainError};
use ezchain_core::{Address, MerkleProof, MultiTransactions};
use ezchain_txpool::{PackagedBlockData, Packager, PoolError, TxPool};
use ezchain_wallet::Keypair;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Node result type
pub type NodeResult<T> = Result<T, NodeError>;

/// Miner configuration
#[derive(Debug, Clone)]
pub struct MinerNodeConfig {
    pub packager: Packager,
}

impl Default for MinerNodeConfig {
    fn default() -> Self {
        Self {
            packager: Packager::default(),
        }
    }
}

/// One produced block with everything accounts need from it
pub struct ProducedBlock {
    pub block: Block,
    pub package: PackagedBlockData,
}

impl ProducedBlock {
    /// The committed bundles in leaf order
    pub fn bundles(&self) -> &[MultiTransactions] {
        self.package.bundles()
    }

    /// Inclusion proof of a sender's bundle against this block's root
    pub fn proof_for_sender(&self, sender: &Address) -> Option<(usize, MerkleProof)> {
        self.package.proof_for_sender(sender)
    }
}

/// A block-producing node over a shared pool and chain
pub struct MinerNode {
    config: MinerNodeConfig,
    keypair: Keypair,
    pool: Arc<TxPool>,
    chain: Arc<RwLock<Blockchain>>,
}

impl MinerNode {
    pub fn new(
        config: MinerNodeConfig,
        keypair: Keypair,
        pool: Arc<TxPool>,
        chain: Arc<RwLock<Blockchain>>,
    ) -> Self {
        Self {
            config,
            keypair,
            pool,
            chain,
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Pack the pool backlog into the next block and commit it.
    ///
    /// The block is signed, checked against its own payload, and attached
    /// to the fork tree with its true sender set retained for later
    /// hidden-block cross-checks.
    pub fn produce_block(&self, timestamp: u64) -> NodeResult<ProducedBlock> {
        let package = self.config.packager.pack(&self.pool)?;

        let (index, pre_hash) = {
            let chain = self.chain.read();
            (chain.tip_height() + 1, chain.tip_hash())
        };

        let mut block = Block::new(
            index,
            pre_hash,
            package.merkle_root(),
            package.bloom().clone(),
            self.keypair.address(),
            0,
            timestamp,
        );
        block.sign(self.keypair.signing_key());
        validate_block_payload(&block, package.bundles())?;

        self.chain
            .write()
            .add_block_with_senders(block.clone(), package.senders().to_vec())?;
        info!(
            height = index,
            bundles = package.len(),
            "block produced and committed"
        );

        Ok(ProducedBlock { block, package })
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn chain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezchain_chain::ChainConfig;
    use ezchain_core::{sha256, BloomFilter, Digest, Transaction, Value};
    use ezchain_txpool::PoolConfig;

    fn genesis_block() -> Block {
        Block::new(
            0,
            Digest::zero(),
            sha256(b"genesis"),
            BloomFilter::with_capacity(1),
            Address::god(),
            0,
            0,
        )
    }

    fn bundle(sender: &str, nonce: u64, begin: u128) -> MultiTransactions {
        let sender = Address::new(sender);
        let v = Value::new(begin, 5).unwrap();
        let tx = Transaction::new(sender.clone(), Address::new("0xr"), vec![v], nonce, nonce);
        MultiTransactions::new(sender, vec![tx]).unwrap()
    }

    #[test]
    fn test_produce_block_commits_and_proves() {
        let pool = Arc::new(TxPool::new(PoolConfig {
            verify_signatures: false,
            ..Default::default()
        }));
        let chain = Arc::new(RwLock::new(
            Blockchain::new(genesis_block(), ChainConfig::default()).unwrap(),
        ));
        let miner = MinerNode::new(
            MinerNodeConfig::default(),
            Keypair::generate(),
            pool.clone(),
            chain.clone(),
        );

        pool.admit(bundle("0xalice", 1, 0x100)).unwrap();
        pool.admit(bundle("0xbob", 1, 0x200)).unwrap();

        let produced = miner.produce_block(1000).unwrap();
        assert_eq!(produced.block.index, 1);
        assert_eq!(chain.read().tip_height(), 1);
        assert!(pool.is_empty());

        // accounts can prove their bundles into the committed root
        let (_, proof) = produced
            .proof_for_sender(&Address::new("0xalice"))
            .unwrap();
        let leaf = produced.bundles()[0].digest().unwrap();
        let root = chain.read().get_merkle_root(1).unwrap();
        assert!(proof.verify(&leaf, &root));

        // and the chain retained the true sender set
        let senders = chain.read().senders_at_height(1).unwrap();
        assert!(senders.contains(&Address::new("0xalice")));
    }

    #[test]
    fn test_empty_pool_produces_nothing() {
        let pool = Arc::new(TxPool::with_defaults());
        let chain = Arc::new(RwLock::new(
            Blockchain::new(genesis_block(), ChainConfig::default()).unwrap(),
        ));
        let miner = MinerNode::new(
            MinerNodeConfig::default(),
            Keypair::generate(),
            pool,
            chain,
        );
        assert!(matches!(
            miner.produce_block(1000),
            Err(NodeError::Pool(PoolError::NothingToPack))
        ));
    }
}
