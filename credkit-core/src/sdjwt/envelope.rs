//! Canonical base64url-JSON envelope codec.
//!
//! A claim set is an ordered JSON object. [`encode`] writes it as compact JSON
//! in insertion order and base64url-encodes the UTF-8 bytes without padding;
//! [`decode`] reverses that and accepts padded input as well.
//!
//! The `require_*` / `optional_*` functions are the shared field accessors used
//! by every claim body.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};

use super::error::{SdJwtError, SdJwtResult};

/// Ordered claim name to value mapping.
pub type ClaimSet = Map<String, Value>;

/// A typed claim body that converts to and from a [`ClaimSet`].
pub trait ClaimBody: Sized {
    /// Builds the claim set, inserting fields in wire order.
    fn to_claims(&self) -> ClaimSet;

    /// Reads the body back from a claim set.
    ///
    /// # Errors
    ///
    /// Returns [`SdJwtError::MissingClaim`] for an absent required field and
    /// [`SdJwtError::InvalidClaim`] for a field of the wrong kind.
    fn from_claims(claims: &ClaimSet) -> SdJwtResult<Self>;

    /// Encodes the body as a base64url envelope.
    #[must_use]
    fn encode(&self) -> String {
        encode(&self.to_claims())
    }

    /// Decodes the body from a base64url envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SdJwtError::EnvelopeDecode`] if the envelope is malformed, or
    /// any error of [`ClaimBody::from_claims`].
    fn decode(input: &str) -> SdJwtResult<Self> {
        Self::from_claims(&decode(input)?)
    }
}

/// Encodes a claim set as base64url (no padding) compact JSON.
#[must_use]
pub fn encode(claims: &ClaimSet) -> String {
    let json = Value::Object(claims.clone()).to_string();
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decodes a base64url envelope into a claim set.
///
/// # Errors
///
/// Returns [`SdJwtError::EnvelopeDecode`] if the input is not base64url, the
/// bytes are not JSON, or the JSON value is not an object.
pub fn decode(input: &str) -> SdJwtResult<ClaimSet> {
    let bytes = URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| SdJwtError::EnvelopeDecode(format!("invalid base64url: {e}")))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(other) => Err(SdJwtError::EnvelopeDecode(format!(
            "expected a JSON object, found {}",
            kind(&other)
        ))),
        Err(e) => Err(SdJwtError::EnvelopeDecode(format!("invalid JSON: {e}"))),
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Returns the value of a required claim.
///
/// # Errors
///
/// Returns [`SdJwtError::MissingClaim`] if the claim is absent.
pub fn require<'a>(claims: &'a ClaimSet, key: &str) -> SdJwtResult<&'a Value> {
    claims
        .get(key)
        .ok_or_else(|| SdJwtError::MissingClaim(key.to_string()))
}

/// Returns a required string claim.
///
/// # Errors
///
/// Returns [`SdJwtError::MissingClaim`] or [`SdJwtError::InvalidClaim`].
pub fn require_str(claims: &ClaimSet, key: &str) -> SdJwtResult<String> {
    require(claims, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SdJwtError::invalid_claim(key, "a string"))
}

/// Returns a required non-negative integer claim (epoch seconds).
///
/// # Errors
///
/// Returns [`SdJwtError::MissingClaim`] or [`SdJwtError::InvalidClaim`].
pub fn require_u64(claims: &ClaimSet, key: &str) -> SdJwtResult<u64> {
    require(claims, key)?
        .as_u64()
        .ok_or_else(|| SdJwtError::invalid_claim(key, "a non-negative integer"))
}

/// Returns a required array of strings, preserving element order.
///
/// # Errors
///
/// Returns [`SdJwtError::MissingClaim`] or [`SdJwtError::InvalidClaim`].
pub fn require_str_array(claims: &ClaimSet, key: &str) -> SdJwtResult<Vec<String>> {
    str_array(require(claims, key)?, key)
}

/// Returns an optional array of strings. Absent and `null` both yield an empty list.
///
/// # Errors
///
/// Returns [`SdJwtError::InvalidClaim`] if the claim is not an array of strings.
pub fn optional_str_array(claims: &ClaimSet, key: &str) -> SdJwtResult<Vec<String>> {
    match present(claims, key) {
        Some(value) => str_array(value, key),
        None => Ok(Vec::new()),
    }
}

/// Returns an optional string claim. `null` is treated as absent.
///
/// # Errors
///
/// Returns [`SdJwtError::InvalidClaim`] if the claim is not a string.
pub fn optional_str(claims: &ClaimSet, key: &str) -> SdJwtResult<Option<String>> {
    present(claims, key)
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| SdJwtError::invalid_claim(key, "a string"))
        })
        .transpose()
}

/// Returns an optional integer claim. `null` is treated as absent.
///
/// # Errors
///
/// Returns [`SdJwtError::InvalidClaim`] if the claim is not a non-negative integer.
pub fn optional_u64(claims: &ClaimSet, key: &str) -> SdJwtResult<Option<u64>> {
    present(claims, key)
        .map(|value| {
            value
                .as_u64()
                .ok_or_else(|| SdJwtError::invalid_claim(key, "a non-negative integer"))
        })
        .transpose()
}

/// Returns an optional nested object claim. `null` is treated as absent.
///
/// # Errors
///
/// Returns [`SdJwtError::InvalidClaim`] if the claim is not an object.
pub fn optional_object(claims: &ClaimSet, key: &str) -> SdJwtResult<Option<ClaimSet>> {
    present(claims, key)
        .map(|value| {
            value
                .as_object()
                .cloned()
                .ok_or_else(|| SdJwtError::invalid_claim(key, "an object"))
        })
        .transpose()
}

fn present<'a>(claims: &'a ClaimSet, key: &str) -> Option<&'a Value> {
    claims.get(key).filter(|value| !value.is_null())
}

fn str_array(value: &Value, key: &str) -> SdJwtResult<Vec<String>> {
    let invalid = || SdJwtError::invalid_claim(key, "an array of strings");
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}
