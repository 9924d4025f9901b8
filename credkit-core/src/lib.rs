//! Core of credkit.
//!
//! The crate is split along the three pieces a wallet needs to hold
//! selective-disclosure credentials:
//!
//! - [`sdjwt`]: the base64url-JSON envelope codec and the typed claim bodies
//!   for issuer payloads, key-binding proofs and batch key attestations.
//! - [`secure_area`]: the backend-agnostic key management interface, the
//!   backend registry and a software fallback backend.
//! - [`document`]: documents, credentials and the `Pending -> Certified`
//!   lifecycle, persisted through a [`storage::Storage`] collaborator.
//!
//! ```rust
//! use credkit_core::sdjwt::{ClaimBody, HashAlgorithm, JwtBody};
//!
//! let body = JwtBody::new(
//!     vec!["abc".to_string(), "def".to_string()],
//!     HashAlgorithm::Sha256,
//!     "https://issuer.example",
//!     "org.example.pid",
//! );
//! let encoded = body.encode();
//! assert_eq!(JwtBody::decode(&encoded).unwrap(), body);
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod document;
pub mod logger;
pub mod sdjwt;
pub mod secure_area;
pub mod storage;

mod error;
pub use error::*;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("credkit_core");
