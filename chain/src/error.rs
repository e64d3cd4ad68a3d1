//! Chain errors

use thiserror::Error;

/// Chain result type
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors from fork-tree maintenance and chain persistence
#[derive(Error, Debug)]
pub enum ChainError {
    /// The block's parent is neither on the main chain nor in the fork tree
    #[error("parent block not found: {0}")]
    ParentNotFound(String),

    /// The block failed a validity rule
    #[error("block validation failed: {0}")]
    BlockValidationFailed(String),

    /// Miner signature missing or failing verification
    #[error("invalid block signature: {0}")]
    InvalidSignature(String),

    /// A queried block or height does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted chain data failed its integrity checksum
    #[error("chain store corrupted: {0}")]
    CorruptStore(String),

    /// Core primitive error
    #[error(transparent)]
    Core(#[from] ezchain_core::CoreError),

    /// Snapshot encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Database errors
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
