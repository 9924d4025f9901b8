use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::Digest;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::error::{SdJwtError, SdJwtResult};

/// Hash algorithm used for disclosure digests and `_sd_hash`.
///
/// Identifiers follow the IANA "Named Information Hash Algorithm" registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter,
)]
pub enum HashAlgorithm {
    /// SHA-256.
    #[strum(serialize = "sha-256")]
    Sha256,
    /// SHA-384.
    #[strum(serialize = "sha-384")]
    Sha384,
    /// SHA-512.
    #[strum(serialize = "sha-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Returns the wire identifier, e.g. `sha-256`.
    #[must_use]
    pub fn identifier(self) -> &'static str {
        self.into()
    }

    /// Maps a wire identifier to an algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`SdJwtError::UnknownAlgorithm`] for identifiers outside the
    /// supported set. Matching is exact.
    pub fn from_identifier(identifier: &str) -> SdJwtResult<Self> {
        identifier
            .parse()
            .map_err(|_| SdJwtError::UnknownAlgorithm(identifier.to_string()))
    }

    /// Hashes `data`.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
            Self::Sha384 => sha2::Sha384::digest(data).to_vec(),
            Self::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    /// Base64url digest of an ASCII envelope, the form used by `_sd` entries and
    /// by the key-binding `_sd_hash`.
    #[must_use]
    pub fn sd_hash(self, envelope: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.digest(envelope.as_bytes()))
    }
}
