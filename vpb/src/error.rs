//! VPB errors

use thiserror::Error;

/// VPB result type
pub type VpbResult<T> = Result<T, VpbError>;

/// Errors from value collection and triplet management
#[derive(Error, Debug)]
pub enum VpbError {
    /// Adding a value whose range intersects a held, unspent one
    #[error("value ranges overlap: {0}")]
    OverlapDetected(String),

    /// Not enough unspent units to cover a payment
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u128 },

    /// A value or node is not in the collection
    #[error("not found: {0}")]
    NotFound(String),

    /// Proofs and block index list disagree in length
    #[error("triplet length mismatch: {proofs} proofs against {indices} index entries")]
    LengthMismatch { proofs: usize, indices: usize },

    /// Collection links or indices are inconsistent
    #[error("collection integrity violated: {0}")]
    IntegrityViolation(String),

    /// Core primitive error
    #[error(transparent)]
    Core(#[from] ezchain_core::CoreError),

    /// Persistence error
    #[error(transparent)]
    Storage(#[from] ezchain_storage::StorageError),
}
