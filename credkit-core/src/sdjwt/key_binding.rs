use serde_json::Value;
use subtle::ConstantTimeEq;

use super::algorithm::HashAlgorithm;
use super::envelope::{self, ClaimBody, ClaimSet};
use super::error::SdJwtResult;

/// Payload of a key-binding JWT.
///
/// Proves possession of the holder key at presentation time and ties the
/// proof to one issuer-signed envelope through `sd_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindingBody {
    /// Verifier-provided nonce (`nonce`).
    pub nonce: String,
    /// Intended verifier (`aud`).
    pub audience: String,
    /// Creation time in epoch seconds (`iat`).
    pub creation_time: u64,
    /// Digest of the presented SD-JWT (`_sd_hash`).
    pub sd_hash: String,
}

impl KeyBindingBody {
    /// Creates a body from its parts.
    #[must_use]
    pub fn new(
        nonce: impl Into<String>,
        audience: impl Into<String>,
        creation_time: u64,
        sd_hash: impl Into<String>,
    ) -> Self {
        Self {
            nonce: nonce.into(),
            audience: audience.into(),
            creation_time,
            sd_hash: sd_hash.into(),
        }
    }

    /// Creates a body whose `sd_hash` is computed over `presented`, the
    /// issuer-signed JWT and selected disclosures exactly as sent.
    #[must_use]
    pub fn bind(
        nonce: impl Into<String>,
        audience: impl Into<String>,
        creation_time: u64,
        alg: HashAlgorithm,
        presented: &str,
    ) -> Self {
        Self::new(nonce, audience, creation_time, alg.sd_hash(presented))
    }

    /// Whether `sd_hash` is the digest of `presented` under `alg`.
    #[must_use]
    pub fn binds(&self, alg: HashAlgorithm, presented: &str) -> bool {
        let expected = alg.sd_hash(presented);
        self.sd_hash.as_bytes().ct_eq(expected.as_bytes()).into()
    }
}

impl ClaimBody for KeyBindingBody {
    fn to_claims(&self) -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert("nonce".to_string(), Value::from(self.nonce.as_str()));
        claims.insert("aud".to_string(), Value::from(self.audience.as_str()));
        claims.insert("iat".to_string(), Value::from(self.creation_time));
        claims.insert("_sd_hash".to_string(), Value::from(self.sd_hash.as_str()));
        claims
    }

    fn from_claims(claims: &ClaimSet) -> SdJwtResult<Self> {
        Ok(Self {
            nonce: envelope::require_str(claims, "nonce")?,
            audience: envelope::require_str(claims, "aud")?,
            creation_time: envelope::require_u64(claims, "iat")?,
            sd_hash: envelope::require_str(claims, "_sd_hash")?,
        })
    }
}
