//! Error types for secure-area backends.

use thiserror::Error;

use crate::sdjwt::SdJwtError;
use crate::storage::StorageError;

/// Result type for secure-area operations.
pub type SecureAreaResult<T> = Result<T, SecureAreaError>;

/// Errors raised by [`SecureArea`](super::SecureArea) backends and attestation checks.
#[derive(Debug, Error)]
pub enum SecureAreaError {
    /// No key exists under the alias.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The backend does not implement the requested key algorithm.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The settings need a capability the backend lacks.
    #[error("{backend} does not support {capability}")]
    UnmetCapability {
        /// Identifier of the backend.
        backend: String,
        /// Name of the missing capability.
        capability: &'static str,
    },

    /// The settings are inconsistent on their own.
    #[error("invalid key settings: {0}")]
    InvalidSettings(String),

    /// The attestation does not carry the challenge that was requested.
    #[error("attestation challenge mismatch")]
    AttestationMismatch,

    /// The attestation is malformed or its chain does not verify.
    #[error("invalid attestation: {0}")]
    InvalidAttestation(String),

    /// A signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// A persisted key record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An attestation body could not be decoded.
    #[error(transparent)]
    Claims(#[from] SdJwtError),

    /// Backend specific failure.
    #[error("secure area backend error: {0}")]
    Backend(String),
}
