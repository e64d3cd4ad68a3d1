//! EZchain: a scale-out ledger where value carries its own history
//!
//! This is the root crate re-exporting every EZchain component for
//! integration testing and embedding.
//!
//! ## Architecture Overview
//!
//! EZchain keeps transaction history off-chain. Each spendable value — a
//! contiguous integer range — travels with a self-contained, verifiable
//! Value-Proofs-BlockIndex (VPB) triplet exchanged directly between
//! accounts; the main chain commits only per-block Merkle roots and
//! sender Bloom filters. A receiver verifies an incoming value offline
//! against those commitments alone, detecting double-spends without ever
//! reading transaction history from the chain.
//!
//! ## Crate Organization
//!
//! - `ezchain-core`: values, digests, Merkle trees, Bloom filters,
//!   transactions, proof units, block index lists
//! - `ezchain-chain`: blocks, the fork tree, confirmation, persistence,
//!   and the chain-reader capability
//! - `ezchain-storage`: the per-account database (proofs, values, block
//!   indices, checkpoints)
//! - `ezchain-txpool`: bundle admission and block packaging
//! - `ezchain-vpb`: the value collection, triplet manager, and per-block
//!   updater
//! - `ezchain-validator`: the four-step receiver-side verification
//!   pipeline
//! - `ezchain-genesis`: initial issuance from `GOD`
//! - `ezchain-wallet`: Ed25519 keys and addresses
//! - `ezchain-account`: the account facade tying it all together

pub mod node;

pub use ezchain_account as account;
pub use ezchain_chain as chain;
pub use ezchain_core as core;
pub use ezchain_genesis as genesis;
pub use ezchain_storage as storage;
pub use ezchain_txpool as txpool;
pub use ezchain_validator as validator;
pub use ezchain_vpb as vpb;
pub use ezchain_wallet as wallet;

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::node::{MinerNode, MinerNodeConfig, ProducedBlock};
    pub use ezchain_account::{Account, TxSink};
    pub use ezchain_chain::{Block, Blockchain, ChainConfig, InMemoryChainInfo, MainChainInfo};
    pub use ezchain_core::{
        Address, BlockIndexList, BloomFilter, Digest, MerkleProof, MerkleTree,
        MultiTransactions, ProofUnit, Transaction, Value, ValueState, VpbRecord,
    };
    pub use ezchain_genesis::GenesisBuilder;
    pub use ezchain_storage::AccountStore;
    pub use ezchain_txpool::{Packager, SelectionStrategy, TxPool};
    pub use ezchain_validator::{VerificationReport, VpbValidator};
    pub use ezchain_vpb::{VpbManager, VpbUpdater};
    pub use ezchain_wallet::Keypair;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
