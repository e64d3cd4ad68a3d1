//! Block packaging
//!
//! The packager orders the backlog, keeps the first bundle per sender
//! (deferring the rest to a later block), and derives everything the block
//! header commits to: the Merkle tree over bundle digests and the Bloom
//! filter over senders. The tree is retained so the miner can hand each
//! account the inclusion proof for its bundle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ezchain_core::{Address, BloomFilter, Digest, MerkleProof, MerkleTree, MultiTransactions};

use crate::error::{PoolError, PoolResult};
use crate::pool::TxPool;

/// Order applied before the sender-uniqueness filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Admission order
    #[default]
    Fifo,
    /// Newest bundle first, by transaction timestamp. The value model has
    /// no fee field, so recency stands in for fee priority.
    NewestFirst,
}

/// One packed block's worth of bundles plus the commitments over them
pub struct PackagedBlockData {
    bundles: Vec<MultiTransactions>,
    digests: Vec<Digest>,
    tree: MerkleTree,
    bloom: BloomFilter,
    senders: Vec<Address>,
}

impl PackagedBlockData {
    /// The packed bundles in leaf order
    pub fn bundles(&self) -> &[MultiTransactions] {
        &self.bundles
    }

    /// Bundle digests in leaf order
    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    /// Root the block header commits to
    pub fn merkle_root(&self) -> Digest {
        self.tree.root()
    }

    /// The block's sender Bloom filter
    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    /// Distinct non-empty senders in the package
    pub fn senders(&self) -> &[Address] {
        &self.senders
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Inclusion proof for the bundle at a leaf position
    pub fn proof_for(&self, index: usize) -> PoolResult<MerkleProof> {
        Ok(self.tree.prove(index)?)
    }

    /// Leaf position and proof of a sender's bundle
    pub fn proof_for_sender(&self, sender: &Address) -> Option<(usize, MerkleProof)> {
        let index = self.bundles.iter().position(|b| b.sender == *sender)?;
        self.tree.prove(index).ok().map(|p| (index, p))
    }
}

/// Turns the pool backlog into packed block data
#[derive(Debug, Clone)]
pub struct Packager {
    /// Bundles packed per block at most
    pub max_bundles_per_block: usize,
    pub strategy: SelectionStrategy,
}

impl Default for Packager {
    fn default() -> Self {
        Self {
            max_bundles_per_block: 100,
            strategy: SelectionStrategy::Fifo,
        }
    }
}

impl Packager {
    pub fn new(max_bundles_per_block: usize, strategy: SelectionStrategy) -> Self {
        Self {
            max_bundles_per_block,
            strategy,
        }
    }

    /// Pack the next block's bundles, removing them from the pool.
    /// Bundles filtered for sender uniqueness stay queued for later
    /// blocks.
    pub fn pack(&self, pool: &TxPool) -> PoolResult<PackagedBlockData> {
        let mut entries = pool.snapshot();
        if entries.is_empty() {
            return Err(PoolError::NothingToPack);
        }

        match self.strategy {
            SelectionStrategy::Fifo => {}
            SelectionStrategy::NewestFirst => {
                entries.sort_by_key(|e| {
                    std::cmp::Reverse(
                        e.bundle
                            .transactions
                            .iter()
                            .map(|t| t.timestamp)
                            .max()
                            .unwrap_or(0),
                    )
                });
            }
        }

        // sender-uniqueness: keep the first bundle per sender; bundles
        // without a sender are never filtered
        let mut seen: HashSet<Address> = HashSet::new();
        let mut picked = Vec::new();
        for entry in entries {
            if picked.len() >= self.max_bundles_per_block {
                break;
            }
            if entry.bundle.sender.is_empty() {
                picked.push(entry);
                continue;
            }
            if seen.insert(entry.bundle.sender.clone()) {
                picked.push(entry);
            }
        }

        let digests: Vec<Digest> = picked.iter().map(|e| e.digest).collect();
        let tree = MerkleTree::build(digests.clone())?;

        let mut senders = Vec::new();
        let mut bloom = BloomFilter::with_capacity(picked.len());
        for entry in &picked {
            if !entry.bundle.sender.is_empty() && !senders.contains(&entry.bundle.sender) {
                senders.push(entry.bundle.sender.clone());
                bloom.insert(&entry.bundle.sender);
            }
        }

        pool.take(&digests)?;
        debug!(
            packed = picked.len(),
            remaining = pool.len(),
            "bundles packed for block"
        );

        Ok(PackagedBlockData {
            bundles: picked.into_iter().map(|e| e.bundle).collect(),
            digests,
            tree,
            bloom,
            senders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use ezchain_core::{Transaction, Value};

    fn pool() -> TxPool {
        TxPool::new(PoolConfig {
            verify_signatures: false,
            ..Default::default()
        })
    }

    fn bundle(sender: &str, nonce: u64, begin: u128) -> MultiTransactions {
        let sender = Address::new(sender);
        let v = Value::new(begin, 5).unwrap();
        let tx = Transaction::new(sender.clone(), Address::new("0xr"), vec![v], nonce, nonce);
        MultiTransactions::new(sender, vec![tx]).unwrap()
    }

    #[test]
    fn test_sender_uniqueness_filter() {
        let pool = pool();
        // 3 from alice, 2 from bob, 1 each from charlie/dave/eve, 2 with
        // no sender
        let first_alice = pool.admit(bundle("0xalice", 1, 0x100)).unwrap();
        pool.admit(bundle("0xalice", 2, 0x110)).unwrap();
        pool.admit(bundle("0xalice", 3, 0x120)).unwrap();
        let first_bob = pool.admit(bundle("0xbob", 1, 0x200)).unwrap();
        pool.admit(bundle("0xbob", 2, 0x210)).unwrap();
        pool.admit(bundle("0xcharlie", 1, 0x300)).unwrap();
        pool.admit(bundle("0xdave", 1, 0x400)).unwrap();
        pool.admit(bundle("0xeve", 1, 0x500)).unwrap();
        pool.admit(bundle("", 0, 0x600)).unwrap();
        pool.admit(bundle("", 0, 0x700)).unwrap();

        let package = Packager::default().pack(&pool).unwrap();
        assert_eq!(package.len(), 7);
        assert_eq!(package.digests()[0], first_alice);
        assert_eq!(package.digests()[1], first_bob);
        assert_eq!(package.senders().len(), 5);

        // deferred bundles stay queued: the second alice/bob bundles
        assert_eq!(pool.len(), 3);

        let next = Packager::default().pack(&pool).unwrap();
        assert_eq!(next.len(), 3);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_commitments_cover_package() {
        let pool = pool();
        for i in 0..4u64 {
            pool.admit(bundle(&format!("0xs{}", i), 1, 0x100 * i as u128 + 1))
                .unwrap();
        }
        let package = Packager::default().pack(&pool).unwrap();

        let root = package.merkle_root();
        for (i, bundle) in package.bundles().iter().enumerate() {
            let proof = package.proof_for(i).unwrap();
            assert!(proof.verify(&bundle.digest().unwrap(), &root));
            assert!(package.bloom().might_contain(&bundle.sender));
        }
    }

    #[test]
    fn test_proof_for_sender() {
        let pool = pool();
        pool.admit(bundle("0xa", 1, 0x100)).unwrap();
        pool.admit(bundle("0xb", 1, 0x200)).unwrap();
        let package = Packager::default().pack(&pool).unwrap();

        let (index, proof) = package.proof_for_sender(&Address::new("0xb")).unwrap();
        assert_eq!(index, 1);
        let leaf = package.bundles()[1].digest().unwrap();
        assert!(proof.verify(&leaf, &package.merkle_root()));
        assert!(package.proof_for_sender(&Address::new("0xzz")).is_none());
    }

    #[test]
    fn test_empty_pool_has_nothing_to_pack() {
        let pool = pool();
        assert!(matches!(
            Packager::default().pack(&pool),
            Err(PoolError::NothingToPack)
        ));
    }

    #[test]
    fn test_max_bundles_cap() {
        let pool = pool();
        for i in 0..10u64 {
            pool.admit(bundle(&format!("0xs{}", i), 1, 0x1000 * (i as u128 + 1)))
                .unwrap();
        }
        let packager = Packager::new(4, SelectionStrategy::Fifo);
        let package = packager.pack(&pool).unwrap();
        assert_eq!(package.len(), 4);
        assert_eq!(pool.len(), 6);
    }
}
