//! Documents, credentials and the credential lifecycle.
//!
//! A [`Document`] groups credentials issued for one identity document. Each
//! [`Credential`] starts `Pending`, bound to a fresh secure-area key (or to no
//! key at all), and becomes `Certified` exactly once when the issuer's data is
//! attached through [`DocumentStore::certify`].

mod error;
mod loader;
mod metadata;
mod records;
mod store;
mod types;

pub use error::{DocumentError, DocumentResult};
pub use loader::{CredentialFactory, CredentialLoader};
pub use metadata::{DocumentMetadata, DocumentMetadataFactory, SimpleDocumentMetadata};
pub use store::{BatchCreateCredentialsResult, DocumentStore};
pub use types::{
    Credential, CredentialState, CredentialStatus, Document, IssuerProof, SecureAreaBinding,
    KEYLESS_CREDENTIAL, SECURE_AREA_BOUND_CREDENTIAL,
};
