//! Storage errors

use thiserror::Error;

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the per-account persistent stores
#[derive(Error, Debug)]
pub enum StorageError {
    /// A requested row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Reference counts and mapping rows disagree
    #[error("ref-count integrity violated: {0}")]
    RefCountIntegrity(String),

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
