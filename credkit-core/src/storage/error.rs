//! Error types for the storage collaborator.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by [`Storage`](super::Storage) implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        /// What the storage was doing.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A lock guarding in-memory state was poisoned.
    #[error("storage lock error: {0}")]
    Lock(String),

    /// The namespace or key cannot be stored by this backend.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
