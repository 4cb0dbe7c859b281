//! Error types for storage operations

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Update of a record that does not exist
    #[error("no such record: {0}")]
    NotFound(String),
}
