//! Pool errors

use thiserror::Error;

use ezchain_core::Address;

/// Pool result type
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors from admission and packaging
#[derive(Error, Debug)]
pub enum PoolError {
    /// A transaction in the bundle failed signature verification
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Per-sender nonces must strictly increase across bundles
    #[error("nonce {got} from {sender} does not exceed last admitted nonce {last}")]
    NonceNotIncreasing {
        sender: Address,
        last: u64,
        got: u64,
    },

    /// The bundle digest was already admitted
    #[error("duplicate bundle: {0}")]
    DuplicateBundle(String),

    /// Bundles must carry at least one transaction
    #[error("empty bundle from {0}")]
    EmptyBundle(Address),

    /// The pool is at capacity
    #[error("pool full ({0} bundles)")]
    PoolFull(usize),

    /// Nothing admitted, nothing to pack
    #[error("no bundles available to pack")]
    NothingToPack,

    /// Core primitive error
    #[error(transparent)]
    Core(#[from] ezchain_core::CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
