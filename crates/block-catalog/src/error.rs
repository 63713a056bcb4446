//! Error types for the block catalog.

/// Errors that can occur when working with the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Failed to prepare the catalog's directory on disk
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open or create the backing database
    #[error("catalog database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Failed to begin a transaction
    #[error("catalog transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Failed to open the catalog table
    #[error("catalog table error: {0}")]
    Table(#[from] redb::TableError),

    /// Read or write against the backing storage failed
    #[error("catalog storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// Commit failed; the transaction was rolled back
    #[error("catalog commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A stored record failed to decode
    #[error("malformed catalog record: {0}")]
    Record(#[from] serde_json::Error),
}
