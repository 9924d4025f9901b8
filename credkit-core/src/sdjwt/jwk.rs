use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{json, Value};

use super::envelope::{self, ClaimSet};
use super::error::{SdJwtError, SdJwtResult};
use crate::secure_area::{KeyAlgorithm, PublicKey};

const P256_COORDINATE_LEN: usize = 32;

/// Confirmation (`cnf`) object carrying a public key as a JSON Web Key.
///
/// The object is kept verbatim so that keys produced by other issuers survive
/// a decode/encode cycle; [`JsonWebKey::to_public_key`] interprets the `jwk`
/// member when the key type is one this crate knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonWebKey(ClaimSet);

impl JsonWebKey {
    /// Wraps an existing `cnf` object.
    #[must_use]
    pub const fn from_object(object: ClaimSet) -> Self {
        Self(object)
    }

    /// Builds `{"jwk": {...}}` for a public key.
    ///
    /// # Errors
    ///
    /// Returns [`SdJwtError::InvalidKey`] if the key bytes do not have the
    /// length required by the algorithm.
    pub fn from_public_key(key: &PublicKey) -> SdJwtResult<Self> {
        let jwk = match key.algorithm {
            KeyAlgorithm::Ed25519 => json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "x": URL_SAFE_NO_PAD.encode(&key.bytes),
            }),
            KeyAlgorithm::EcP256 => {
                // Uncompressed SEC1 point: 0x04 || x || y.
                if key.bytes.len() != 1 + 2 * P256_COORDINATE_LEN || key.bytes[0] != 0x04 {
                    return Err(SdJwtError::InvalidKey(
                        "P-256 key must be an uncompressed SEC1 point".to_string(),
                    ));
                }
                let (x, y) = key.bytes[1..].split_at(P256_COORDINATE_LEN);
                json!({
                    "kty": "EC",
                    "crv": "P-256",
                    "x": URL_SAFE_NO_PAD.encode(x),
                    "y": URL_SAFE_NO_PAD.encode(y),
                })
            }
        };
        let mut object = ClaimSet::new();
        object.insert("jwk".to_string(), jwk);
        Ok(Self(object))
    }

    /// Returns the wrapped object.
    #[must_use]
    pub const fn as_object(&self) -> &ClaimSet {
        &self.0
    }

    /// Consumes the wrapper and returns the object.
    #[must_use]
    pub fn into_object(self) -> ClaimSet {
        self.0
    }

    /// Interprets the `jwk` member as a public key.
    ///
    /// # Errors
    ///
    /// Returns [`SdJwtError::MissingClaim`] if there is no `jwk` member and
    /// [`SdJwtError::InvalidKey`] for unsupported or malformed keys.
    pub fn to_public_key(&self) -> SdJwtResult<PublicKey> {
        let jwk = match envelope::require(&self.0, "jwk")? {
            Value::Object(jwk) => jwk,
            _ => return Err(SdJwtError::invalid_claim("jwk", "an object")),
        };
        let kty = envelope::require_str(jwk, "kty")?;
        let crv = envelope::require_str(jwk, "crv")?;
        match (kty.as_str(), crv.as_str()) {
            ("OKP", "Ed25519") => Ok(PublicKey::new(
                KeyAlgorithm::Ed25519,
                coordinate(jwk, "x")?,
            )),
            ("EC", "P-256") => {
                let x = coordinate(jwk, "x")?;
                let y = coordinate(jwk, "y")?;
                if x.len() != P256_COORDINATE_LEN || y.len() != P256_COORDINATE_LEN {
                    return Err(SdJwtError::InvalidKey(
                        "P-256 coordinates must be 32 bytes".to_string(),
                    ));
                }
                let mut bytes = Vec::with_capacity(1 + 2 * P256_COORDINATE_LEN);
                bytes.push(0x04);
                bytes.extend_from_slice(&x);
                bytes.extend_from_slice(&y);
                Ok(PublicKey::new(KeyAlgorithm::EcP256, bytes))
            }
            (kty, crv) => Err(SdJwtError::InvalidKey(format!(
                "unsupported key type {kty}/{crv}"
            ))),
        }
    }
}

fn coordinate(jwk: &ClaimSet, key: &str) -> SdJwtResult<Vec<u8>> {
    let encoded = envelope::require_str(jwk, key)?;
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| SdJwtError::InvalidKey(format!("{key} is not base64url: {e}")))
}
