//! Error types for the document store.

use thiserror::Error;

use crate::secure_area::SecureAreaError;
use crate::storage::StorageError;

/// Result type for document store operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised by the [`DocumentStore`](super::DocumentStore).
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No secure area is registered under the identifier.
    #[error("unknown secure area: {0}")]
    UnknownSecureArea(String),

    /// The document does not exist.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The credential does not exist.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// The lifecycle transition is not allowed from the current state.
    #[error("credential {credential_id} cannot go from {from} to {to}")]
    InvalidTransition {
        /// Credential the transition was attempted on.
        credential_id: String,
        /// State the credential was found in.
        from: String,
        /// Requested state.
        to: String,
    },

    /// `replacement_for` does not name a credential of the same document and domain.
    #[error("invalid replacement: {0}")]
    InvalidReplacement(String),

    /// The issuer proof is inconsistent.
    #[error("invalid issuer proof: {0}")]
    InvalidProof(String),

    /// No loader is registered for the credential type.
    #[error("unknown credential type: {0}")]
    UnknownCredentialType(String),

    /// The credential is not bound to a secure-area key.
    #[error("credential {0} has no secure area binding")]
    NoSecureAreaBinding(String),

    /// A persisted record could not be decoded or is inconsistent.
    #[error("corrupted record: {0}")]
    CorruptedRecord(String),

    /// A persisted record has an unknown version.
    #[error("unsupported record version: {0}")]
    UnsupportedRecordVersion(u32),

    /// A record or metadata could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A secure-area operation failed.
    #[error(transparent)]
    SecureArea(#[from] SecureAreaError),
}
