//! Core errors

use thiserror::Error;

use crate::value::ValueState;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by the core primitives
#[derive(Error, Debug)]
pub enum CoreError {
    /// A data structure violates one of its invariants
    #[error("structural invariant violated: {0}")]
    StructuralInvalid(String),

    /// Signature missing, malformed, or failing verification
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Illegal value-state transition
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: ValueState, to: ValueState },

    /// Split amount outside (0, value_num)
    #[error("invalid split amount {amount} for value spanning {value_num} units")]
    InvalidSplit { amount: u64, value_num: u64 },

    /// Two value ranges held by one account intersect
    #[error("value ranges overlap: {0}")]
    OverlapDetected(String),

    /// Block-index heights must be strictly increasing
    #[error("block index out of order: {0}")]
    IndexOutOfOrder(String),

    /// Ownership history contradicts the index list
    #[error("owner transfer inconsistent: {0}")]
    OwnerTransferInconsistent(String),

    /// Merkle proof does not reproduce the expected root
    #[error("merkle proof mismatch against root {root}")]
    MerkleMismatch { root: String },

    /// Hex string could not be decoded into a digest or key
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// Canonical serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
