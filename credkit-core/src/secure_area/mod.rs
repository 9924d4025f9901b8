//! Backend-agnostic key management.
//!
//! A [`SecureArea`] creates, attests, signs with and deletes keys. Backends
//! are trait objects registered by identifier in a [`SecureAreaRepository`];
//! [`SoftwareSecureArea`] is the built-in fallback that keeps keys in a
//! [`Storage`](crate::storage::Storage).
//!
//! Every operation is `async` and may be cancelled by dropping its future.

use async_trait::async_trait;

mod attestation;
mod error;
mod registry;
mod software;
mod types;

pub use attestation::{
    Attestation, AttestationCertificate, BatchKeyAttestation, SecurityRequirement,
};
pub use error::{SecureAreaError, SecureAreaResult};
pub use registry::SecureAreaRepository;
pub use software::{SoftwareSecureArea, SOFTWARE_SECURE_AREA_IDENTIFIER};
pub use types::{
    BatchCreateKeyResult, Capabilities, CreateKeySettings, ExecutionEnvironment, KeyAlgorithm,
    KeyInfo, PublicKey, SecurityLevel, ValidityWindow,
};

/// A key management backend.
#[async_trait]
pub trait SecureArea: Send + Sync {
    /// Identifier the backend is registered under.
    fn identifier(&self) -> &str;

    /// Human readable name.
    fn display_name(&self) -> &str;

    /// What the backend can do.
    fn capabilities(&self) -> &Capabilities;

    /// Creates a key. When `alias` is `None` the backend picks one.
    ///
    /// The returned [`KeyInfo`] always carries an attestation whose leaf holds
    /// `settings.attestation_challenge`.
    ///
    /// # Errors
    ///
    /// Fails if the settings need an unmet capability or the backend fails.
    async fn create_key(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo>;

    /// Creates `count` keys with the same settings.
    ///
    /// Backends reporting `batch_key_attestation_supported` return one
    /// [`BatchKeyAttestation`] when `settings.key_attestation_nonce` is set and
    /// then omit the per-key attestations. This default creates the keys one
    /// by one and never aggregates.
    ///
    /// # Errors
    ///
    /// Fails on the first key that cannot be created. Keys created earlier in
    /// the batch are deleted before the error is returned.
    async fn batch_create_key(
        &self,
        count: usize,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<BatchCreateKeyResult> {
        let mut key_infos: Vec<KeyInfo> = Vec::with_capacity(count);
        for _ in 0..count {
            match self.create_key(None, settings).await {
                Ok(info) => key_infos.push(info),
                Err(err) => {
                    for info in &key_infos {
                        if let Err(cleanup) = self.delete_key(&info.alias).await {
                            log::warn!(
                                "{}: failed to delete key {} of aborted batch: {cleanup}",
                                self.identifier(),
                                info.alias
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(BatchCreateKeyResult {
            key_infos,
            key_attestation: None,
        })
    }

    /// Describes an existing key.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::KeyNotFound`] for an unknown alias.
    async fn key_info(&self, alias: &str) -> SecureAreaResult<KeyInfo>;

    /// Returns the attestation of an existing key.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::KeyNotFound`] for an unknown alias and
    /// [`SecureAreaError::InvalidAttestation`] if the key has none.
    async fn get_attestation(&self, alias: &str) -> SecureAreaResult<Attestation> {
        self.key_info(alias).await?.attestation.ok_or_else(|| {
            SecureAreaError::InvalidAttestation(format!("key {alias} has no attestation"))
        })
    }

    /// Signs `message` with the key.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::KeyNotFound`] for an unknown alias.
    async fn sign(&self, alias: &str, message: &[u8]) -> SecureAreaResult<Vec<u8>>;

    /// Deletes the key.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::KeyNotFound`] for an unknown alias.
    async fn delete_key(&self, alias: &str) -> SecureAreaResult<()>;
}
