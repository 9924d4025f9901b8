use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;

use super::metadata::DocumentMetadata;
use crate::secure_area::PublicKey;

/// Type of credentials bound to a secure-area key.
pub const SECURE_AREA_BOUND_CREDENTIAL: &str = "SecureAreaBoundCredential";

/// Type of credentials without key material.
pub const KEYLESS_CREDENTIAL: &str = "KeylessCredential";

/// Key backing a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureAreaBinding {
    /// Identifier of the secure area holding the key.
    pub secure_area_id: String,
    /// Alias of the key in that secure area.
    pub alias: String,
    /// Public half of the key.
    pub public_key: PublicKey,
}

/// Issuer data attached when a credential is certified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerProof {
    /// Opaque issuer-provided bytes, e.g. a signed SD-JWT.
    pub issuer_data: Vec<u8>,
    /// First second the credential may be presented.
    pub valid_from: u64,
    /// Last second the credential may be presented.
    pub valid_until: u64,
}

impl IssuerProof {
    /// Creates a proof.
    #[must_use]
    pub const fn new(issuer_data: Vec<u8>, valid_from: u64, valid_until: u64) -> Self {
        Self {
            issuer_data,
            valid_from,
            valid_until,
        }
    }

    /// Whether `now` lies in `valid_from..=valid_until`.
    #[must_use]
    pub const fn is_valid_at(&self, now: u64) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }
}

/// Lifecycle state of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialState {
    /// Key created, waiting for the issuer.
    Pending,
    /// Issuer data attached.
    Certified(IssuerProof),
}

impl CredentialState {
    /// State name without the payload.
    #[must_use]
    pub const fn status(&self) -> CredentialStatus {
        match self {
            Self::Pending => CredentialStatus::Pending,
            Self::Certified(_) => CredentialStatus::Certified,
        }
    }
}

/// Name of a [`CredentialState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CredentialStatus {
    /// See [`CredentialState::Pending`].
    Pending,
    /// See [`CredentialState::Certified`].
    Certified,
}

/// A credential held by a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Unique identifier.
    pub identifier: String,
    /// Identifier of the owning document.
    pub document_id: String,
    /// Discriminator resolved by the [`CredentialLoader`](super::CredentialLoader).
    pub credential_type: String,
    /// Use-purpose partition inside the document.
    pub domain: String,
    /// Older credential of the same document and domain this one replaces.
    pub replacement_for: Option<String>,
    /// Backing key, for secure-area bound types.
    pub binding: Option<SecureAreaBinding>,
    /// Lifecycle state.
    pub state: CredentialState,
    /// Number of presentations made with this credential.
    pub usage_count: u64,
}

impl Credential {
    /// Whether a secure-area key backs this credential.
    #[must_use]
    pub const fn has_secure_area_binding(&self) -> bool {
        self.binding.is_some()
    }

    /// Whether [`certify`](super::DocumentStore::certify) may still be called.
    #[must_use]
    pub const fn is_certifiable(&self) -> bool {
        matches!(self.state, CredentialState::Pending)
    }

    /// Whether issuer data has been attached.
    #[must_use]
    pub const fn is_certified(&self) -> bool {
        matches!(self.state, CredentialState::Certified(_))
    }

    /// Issuer data, once certified.
    #[must_use]
    pub const fn issuer_proof(&self) -> Option<&IssuerProof> {
        match &self.state {
            CredentialState::Pending => None,
            CredentialState::Certified(proof) => Some(proof),
        }
    }

    /// Whether the credential is certified and valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.issuer_proof().is_some_and(|proof| proof.is_valid_at(now))
    }
}

/// Snapshot of a document.
///
/// Store operations always act on persisted state; a snapshot taken before a
/// change does not see it. Call
/// [`lookup_document`](super::DocumentStore::lookup_document) again to refresh.
#[derive(Clone)]
pub struct Document {
    pub(crate) identifier: String,
    pub(crate) metadata: Arc<dyn DocumentMetadata>,
    pub(crate) credentials: Vec<Credential>,
}

impl Document {
    /// Unique identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Metadata produced by the store's metadata factory.
    #[must_use]
    pub fn metadata(&self) -> &Arc<dyn DocumentMetadata> {
        &self.metadata
    }

    /// Credentials in creation order.
    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Credential with the given identifier.
    #[must_use]
    pub fn credential(&self, identifier: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|credential| credential.identifier == identifier)
    }

    /// Credentials of one domain, in creation order.
    pub fn credentials_for_domain<'a>(
        &'a self,
        domain: &'a str,
    ) -> impl Iterator<Item = &'a Credential> + 'a {
        self.credentials
            .iter()
            .filter(move |credential| credential.domain == domain)
    }

    /// Credentials still waiting for the issuer.
    pub fn pending_credentials(&self) -> impl Iterator<Item = &Credential> {
        self.credentials
            .iter()
            .filter(|credential| credential.is_certifiable())
    }

    /// Credentials with issuer data attached.
    pub fn certified_credentials(&self) -> impl Iterator<Item = &Credential> {
        self.credentials
            .iter()
            .filter(|credential| credential.is_certified())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("identifier", &self.identifier)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
