//! SD-JWT claim envelopes.
//!
//! Every body in this module travels as a base64url-encoded JSON object. The
//! codec lives in [`envelope`] as plain functions; the typed bodies convert to
//! and from its generic [`ClaimSet`] through the [`ClaimBody`] trait.
//!
//! # Wire names
//!
//! | body                   | required                                   | optional                   |
//! |------------------------|--------------------------------------------|----------------------------|
//! | [`JwtBody`]            | `_sd`, `_sd_alg`, `iss`, `vct`              | `iat`, `nbf`, `exp`, `cnf` |
//! | [`KeyBindingBody`]     | `nonce`, `aud`, `iat`, `_sd_hash`           |                            |
//! | [`KeyAttestationBody`] | `iat`, `attested_keys`                      | `nonce`, `key_storage`, `user_authentication` |

mod algorithm;
pub mod envelope;
mod error;
mod jwk;
mod jwt_body;
mod key_attestation;
mod key_binding;

pub use algorithm::HashAlgorithm;
pub use envelope::{ClaimBody, ClaimSet};
pub use error::{SdJwtError, SdJwtResult};
pub use jwk::JsonWebKey;
pub use jwt_body::JwtBody;
pub use key_attestation::KeyAttestationBody;
pub use key_binding::KeyBindingBody;
