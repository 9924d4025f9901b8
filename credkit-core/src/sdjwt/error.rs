//! Error types for claim envelope decoding.

use thiserror::Error;

/// Result type for claim envelope operations.
pub type SdJwtResult<T> = Result<T, SdJwtError>;

/// Errors raised while decoding claim envelopes and bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdJwtError {
    /// The input is not base64url, not UTF-8 JSON, or not a JSON object.
    #[error("envelope decode error: {0}")]
    EnvelopeDecode(String),

    /// A required claim is absent.
    #[error("missing claim: {0}")]
    MissingClaim(String),

    /// A claim is present but holds the wrong kind of JSON value.
    #[error("invalid claim {key}: expected {expected}")]
    InvalidClaim {
        /// Name of the offending claim.
        key: String,
        /// Kind of value the claim must hold.
        expected: &'static str,
    },

    /// The hash algorithm identifier is not one of the supported algorithms.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A JSON Web Key could not be mapped to a public key.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl SdJwtError {
    pub(crate) fn invalid_claim(key: &str, expected: &'static str) -> Self {
        Self::InvalidClaim {
            key: key.to_string(),
            expected,
        }
    }
}
