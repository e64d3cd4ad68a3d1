//! Verification reports

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use ezchain_core::Address;
use ezchain_storage::CheckPointRecord;

/// One verification failure, tagged with the height it concerns where
/// applicable
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    /// The triplet violates a structural invariant
    #[error("structural invalid: {0}")]
    StructuralInvalid(String),

    /// A matched checkpoint contradicts the record it should bound
    #[error("checkpoint invalid: {0}")]
    CheckpointInvalid(String),

    /// The chain's Bloom filters contradict the claimed sender history
    #[error("bloom inconsistency at height {height}: {reason}")]
    BloomInconsistency { height: u64, reason: String },

    /// A proof unit does not prove into its block's Merkle root
    #[error("merkle mismatch at height {height}: {reason}")]
    MerkleMismatch { height: u64, reason: String },

    /// A committed transaction moves units of this value outside its
    /// recorded transfer
    #[error("double spend detected at height {height}: {conflicting_tx}")]
    DoubleSpendDetected {
        height: u64,
        conflicting_tx: String,
    },

    /// A transfer block lacks the expected owner-to-owner transaction
    #[error("owner transfer inconsistent at height {height}: {reason}")]
    OwnerTransferInconsistent { height: u64, reason: String },

    /// The chain view cannot answer for a height the record references
    #[error("missing chain data at height {height}: {what}")]
    MissingChainData { height: u64, what: String },
}

impl ValidationError {
    /// The height this failure concerns, when it has one
    pub fn height(&self) -> Option<u64> {
        match self {
            ValidationError::StructuralInvalid(_) | ValidationError::CheckpointInvalid(_) => None,
            ValidationError::BloomInconsistency { height, .. }
            | ValidationError::MerkleMismatch { height, .. }
            | ValidationError::DoubleSpendDetected { height, .. }
            | ValidationError::OwnerTransferInconsistent { height, .. }
            | ValidationError::MissingChainData { height, .. } => Some(*height),
        }
    }
}

/// Outcome of one pipeline step
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepReport {
    pub passed: bool,
    pub errors: Vec<ValidationError>,
}

impl StepReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
        }
    }
}

/// The full verification verdict with per-step detail, serializable for
/// operator tooling
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    /// Conjunction of all step results
    pub is_valid: bool,
    pub data_structure: StepReport,
    pub slice: StepReport,
    pub bloom: StepReport,
    pub proofs: StepReport,
    /// Ownership epochs the slice covered: (owner, start, inclusive end,
    /// `None` end for the receiver's open epoch)
    pub verified_epochs: Vec<(Address, u64, Option<u64>)>,
    /// The checkpoint that bounded verification, if one matched
    pub checkpoint_used: Option<CheckPointRecord>,
    /// Heights where a Bloom filter shows a possible unclaimed sender
    /// appearance that the chain view could not settle; soft warnings
    pub suspect_heights: Vec<u64>,
    pub elapsed: Duration,
}

impl VerificationReport {
    /// Every failure across all steps
    pub fn errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.data_structure
            .errors
            .iter()
            .chain(self.slice.errors.iter())
            .chain(self.bloom.errors.iter())
            .chain(self.proofs.errors.iter())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}
