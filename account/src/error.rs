//! Account errors

use thiserror::Error;

/// Account result type
pub type AccountResult<T> = Result<T, AccountError>;

/// Errors from the account facade
#[derive(Error, Debug)]
pub enum AccountError {
    /// A confirmed bundle does not belong to this account
    #[error("bundle sender {0} is not this account")]
    ForeignBundle(String),

    /// No draft payment matches the given bundle
    #[error("no pending payment for bundle {0}")]
    UnknownPayment(String),

    /// Triplet management error
    #[error(transparent)]
    Vpb(#[from] ezchain_vpb::VpbError),

    /// Persistence error
    #[error(transparent)]
    Storage(#[from] ezchain_storage::StorageError),

    /// Core primitive error
    #[error(transparent)]
    Core(#[from] ezchain_core::CoreError),

    /// Pool rejected a submission
    #[error(transparent)]
    Pool(#[from] ezchain_txpool::PoolError),
}
