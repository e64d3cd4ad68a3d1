//! EZchain genesis
//!
//! Builds the chain's first block: `GOD` issues contiguous value ranges to
//! the initial holders in a single bundle, and every holder gets a
//! complete starter triplet — the issuance bundle, its inclusion proof
//! against the genesis Merkle root, and a block index list anchored at
//! height 0.

mod builder;

pub use builder::{GenesisAllocation, GenesisBlock, GenesisBuilder, GenesisVpb};

use thiserror::Error;

/// Genesis errors
#[derive(Error, Debug)]
pub enum GenesisError {
    /// Two allocations overlap or one is empty
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    /// A genesis without allocations issues nothing
    #[error("genesis requires at least one allocation")]
    NoAllocations,

    /// Core primitive error
    #[error(transparent)]
    Core(#[from] ezchain_core::CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Genesis result type
pub type GenesisResult<T> = Result<T, GenesisError>;
