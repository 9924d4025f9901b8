use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::algorithm::HashAlgorithm;
use super::envelope::{self, ClaimBody, ClaimSet};
use super::error::{SdJwtError, SdJwtResult};
use super::jwk::JsonWebKey;

/// Issuer-signed SD-JWT payload.
///
/// `disclosure_hashes` keeps the order it was built with; digests are compared
/// positionally by verifiers and must never be sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtBody {
    /// Digests of the disclosures (`_sd`).
    pub disclosure_hashes: Vec<String>,
    /// Algorithm used to compute the digests (`_sd_alg`).
    pub sd_hash_alg: HashAlgorithm,
    /// Issuer identifier (`iss`).
    pub issuer: String,
    /// Verifiable credential type (`vct`).
    pub doc_type: String,
    /// Issuance time in epoch seconds (`iat`).
    pub time_signed: Option<u64>,
    /// Start of validity in epoch seconds (`nbf`).
    pub time_validity_begin: Option<u64>,
    /// End of validity in epoch seconds (`exp`).
    pub time_validity_end: Option<u64>,
    /// Holder key the credential is bound to (`cnf`).
    pub public_key: Option<JsonWebKey>,
}

impl JwtBody {
    /// Creates a body with the required fields set and every optional field empty.
    #[must_use]
    pub fn new(
        disclosure_hashes: Vec<String>,
        sd_hash_alg: HashAlgorithm,
        issuer: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        Self {
            disclosure_hashes,
            sd_hash_alg,
            issuer: issuer.into(),
            doc_type: doc_type.into(),
            time_signed: None,
            time_validity_begin: None,
            time_validity_end: None,
            public_key: None,
        }
    }

    /// Sets the issuance time.
    #[must_use]
    pub const fn with_time_signed(mut self, epoch_seconds: u64) -> Self {
        self.time_signed = Some(epoch_seconds);
        self
    }

    /// Sets the validity window.
    #[must_use]
    pub const fn with_validity(mut self, begin: u64, end: u64) -> Self {
        self.time_validity_begin = Some(begin);
        self.time_validity_end = Some(end);
        self
    }

    /// Binds the credential to a holder key.
    #[must_use]
    pub fn with_public_key(mut self, key: JsonWebKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Whether `now` falls inside the `nbf`/`exp` window. Missing bounds are open.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.time_validity_begin.is_none_or(|begin| begin <= now)
            && self.time_validity_end.is_none_or(|end| now < end)
    }
}

impl ClaimBody for JwtBody {
    fn to_claims(&self) -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert(
            "_sd".to_string(),
            Value::Array(
                self.disclosure_hashes
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        claims.insert(
            "_sd_alg".to_string(),
            Value::from(self.sd_hash_alg.identifier()),
        );
        claims.insert("iss".to_string(), Value::from(self.issuer.as_str()));
        claims.insert("vct".to_string(), Value::from(self.doc_type.as_str()));
        if let Some(iat) = self.time_signed {
            claims.insert("iat".to_string(), Value::from(iat));
        }
        if let Some(nbf) = self.time_validity_begin {
            claims.insert("nbf".to_string(), Value::from(nbf));
        }
        if let Some(exp) = self.time_validity_end {
            claims.insert("exp".to_string(), Value::from(exp));
        }
        if let Some(key) = &self.public_key {
            claims.insert("cnf".to_string(), Value::Object(key.as_object().clone()));
        }
        claims
    }

    fn from_claims(claims: &ClaimSet) -> SdJwtResult<Self> {
        Ok(Self {
            disclosure_hashes: envelope::require_str_array(claims, "_sd")?,
            sd_hash_alg: HashAlgorithm::from_identifier(&envelope::require_str(
                claims, "_sd_alg",
            )?)?,
            issuer: envelope::require_str(claims, "iss")?,
            doc_type: envelope::require_str(claims, "vct")?,
            time_signed: envelope::optional_u64(claims, "iat")?,
            time_validity_begin: envelope::optional_u64(claims, "nbf")?,
            time_validity_end: envelope::optional_u64(claims, "exp")?,
            public_key: envelope::optional_object(claims, "cnf")?.map(JsonWebKey::from_object),
        })
    }
}

impl fmt::Display for JwtBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for JwtBody {
    type Err = SdJwtError;

    fn from_str(s: &str) -> SdJwtResult<Self> {
        Self::decode(s)
    }
}
