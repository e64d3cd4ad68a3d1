//! EZchain main chain
//!
//! The consensus-side state that VPB verification depends on: blocks
//! committing a Merkle root and a sender Bloom filter, the fork tree with
//! longest-chain resolution and k-confirmation, and the narrow
//! [`MainChainInfo`] read capability handed to verifiers.
//!
//! The chain holds no transaction bodies. Bundles live with the accounts
//! they concern; a block only ever commits their digests.

mod block;
mod error;
mod fork;
mod reader;
mod store;

pub use block::{
    validate_block_payload, AcceptAllHeaders, Block, HeaderValidator, SignatureHeaderValidator,
    BLOCK_VERSION,
};
pub use error::{ChainError, ChainResult};
pub use fork::{Blockchain, ChainConfig, ChainEvent, ConsensusStatus, ForkStats};
pub use reader::{InMemoryChainInfo, MainChainInfo};
pub use store::{BackupConfig, ChainSnapshot, ChainStore, StoredNode};
