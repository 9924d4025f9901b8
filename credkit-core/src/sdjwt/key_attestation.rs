use serde_json::Value;

use super::envelope::{self, ClaimBody, ClaimSet};
use super::error::{SdJwtError, SdJwtResult};
use super::jwk::JsonWebKey;

/// Payload of an OpenID4VCI key attestation covering a batch of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttestationBody {
    /// Issuance time in epoch seconds (`iat`).
    pub issued_at: u64,
    /// Attested keys, index aligned with the batch (`attested_keys`).
    pub attested_keys: Vec<JsonWebKey>,
    /// Nonce supplied by the credential issuer (`nonce`).
    pub nonce: Option<String>,
    /// Storage protection levels, e.g. `iso_18045_basic` (`key_storage`).
    pub key_storage: Vec<String>,
    /// User authentication levels (`user_authentication`).
    pub user_authentication: Vec<String>,
}

impl ClaimBody for KeyAttestationBody {
    fn to_claims(&self) -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert("iat".to_string(), Value::from(self.issued_at));
        claims.insert(
            "attested_keys".to_string(),
            Value::Array(
                self.attested_keys
                    .iter()
                    .map(|key| Value::Object(key.as_object().clone()))
                    .collect(),
            ),
        );
        if let Some(nonce) = &self.nonce {
            claims.insert("nonce".to_string(), Value::from(nonce.as_str()));
        }
        if !self.key_storage.is_empty() {
            claims.insert("key_storage".to_string(), string_array(&self.key_storage));
        }
        if !self.user_authentication.is_empty() {
            claims.insert(
                "user_authentication".to_string(),
                string_array(&self.user_authentication),
            );
        }
        claims
    }

    fn from_claims(claims: &ClaimSet) -> SdJwtResult<Self> {
        let attested_keys = envelope::require(claims, "attested_keys")?
            .as_array()
            .ok_or_else(|| SdJwtError::invalid_claim("attested_keys", "an array of objects"))?
            .iter()
            .map(|key| {
                key.as_object()
                    .cloned()
                    .map(JsonWebKey::from_object)
                    .ok_or_else(|| SdJwtError::invalid_claim("attested_keys", "an array of objects"))
            })
            .collect::<SdJwtResult<Vec<_>>>()?;
        Ok(Self {
            issued_at: envelope::require_u64(claims, "iat")?,
            attested_keys,
            nonce: envelope::optional_str(claims, "nonce")?,
            key_storage: envelope::optional_str_array(claims, "key_storage")?,
            user_authentication: envelope::optional_str_array(claims, "user_authentication")?,
        })
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}
