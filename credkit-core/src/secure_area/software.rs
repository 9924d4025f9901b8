//! Software fallback backend.
//!
//! Private keys are Ed25519 seeds kept in a [`Storage`] namespace named after
//! the backend identifier. Attestations are issued by a per-backend root key
//! stored in `<identifier>.attestation`, created on first use.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::attestation::{Attestation, AttestationCertificate, BatchKeyAttestation};
use super::error::{SecureAreaError, SecureAreaResult};
use super::types::{
    BatchCreateKeyResult, Capabilities, CreateKeySettings, ExecutionEnvironment, KeyAlgorithm,
    KeyInfo, PublicKey, SecurityLevel, ValidityWindow,
};
use super::SecureArea;
use crate::sdjwt::{JsonWebKey, KeyAttestationBody};
use crate::storage::Storage;

/// Identifier of [`SoftwareSecureArea`] unless overridden.
pub const SOFTWARE_SECURE_AREA_IDENTIFIER: &str = "SoftwareSecureArea";

const RECORD_VERSION: u32 = 1;
const ROOT_KEY: &str = "root";

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    #[zeroize(skip)]
    version: u32,
    seed: [u8; 32],
    #[zeroize(skip)]
    algorithm: KeyAlgorithm,
    #[zeroize(skip)]
    user_authentication_required: bool,
    #[zeroize(skip)]
    validity: Option<ValidityWindow>,
    #[zeroize(skip)]
    attestation: Attestation,
}

impl StoredKey {
    fn serialize(&self) -> SecureAreaResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| SecureAreaError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    fn deserialize(bytes: &[u8]) -> SecureAreaResult<Self> {
        let stored: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| SecureAreaError::Serialization(err.to_string()))?;
        if stored.version != RECORD_VERSION {
            return Err(SecureAreaError::Serialization(format!(
                "unsupported key record version {}",
                stored.version
            )));
        }
        Ok(stored)
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.seed)
    }

    fn key_info(&self, alias: &str) -> KeyInfo {
        let public_key = PublicKey::new(
            self.algorithm,
            self.signing_key().verifying_key().to_bytes().to_vec(),
        );
        KeyInfo {
            alias: alias.to_string(),
            public_key,
            attestation: Some(self.attestation.clone()),
            user_authentication_required: self.user_authentication_required,
            validity: self.validity,
            metadata: BTreeMap::new(),
        }
    }
}

/// Secure area keeping keys in software.
pub struct SoftwareSecureArea {
    storage: Arc<dyn Storage>,
    identifier: String,
    display_name: String,
    capabilities: Capabilities,
    root_lock: Mutex<()>,
    key_lock: Mutex<()>,
}

impl SoftwareSecureArea {
    /// Creates a backend persisting keys in `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            identifier: SOFTWARE_SECURE_AREA_IDENTIFIER.to_string(),
            display_name: "Software Secure Area".to_string(),
            capabilities: Capabilities {
                algorithms: vec![KeyAlgorithm::Ed25519],
                secure_lock_screen_setup: false,
                user_authentication_supported: false,
                batch_key_attestation_supported: true,
                security_level: SecurityLevel::Software,
                execution_environment: ExecutionEnvironment::Physical,
            },
            root_lock: Mutex::new(()),
            key_lock: Mutex::new(()),
        }
    }

    /// Replaces the identifier, which also selects the storage namespaces.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Replaces the reported capabilities.
    ///
    /// Only [`KeyAlgorithm::Ed25519`] keys can actually be created.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn attestation_namespace(&self) -> String {
        format!("{}.attestation", self.identifier)
    }

    fn load(&self, alias: &str) -> SecureAreaResult<StoredKey> {
        let bytes = self
            .storage
            .get(&self.identifier, alias)?
            .ok_or_else(|| SecureAreaError::KeyNotFound(alias.to_string()))?;
        StoredKey::deserialize(&bytes)
    }

    /// Loads the attestation root, creating it on first use.
    fn root(&self) -> SecureAreaResult<StoredKey> {
        let guard = self.root_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let root = self.load_or_create_root();
        drop(guard);
        root
    }

    fn load_or_create_root(&self) -> SecureAreaResult<StoredKey> {
        let namespace = self.attestation_namespace();
        if let Some(bytes) = self.storage.get(&namespace, ROOT_KEY)? {
            return StoredKey::deserialize(&bytes);
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let certificate = AttestationCertificate {
            issuer: self.identifier.clone(),
            subject_key: PublicKey::new(
                KeyAlgorithm::Ed25519,
                signing_key.verifying_key().to_bytes().to_vec(),
            ),
            challenge: Vec::new(),
            security_level: self.capabilities.security_level,
            user_authentication_required: false,
            not_before: None,
            not_after: None,
            signature: Vec::new(),
        }
        .sign_with(&signing_key)?;
        let root = StoredKey {
            version: RECORD_VERSION,
            seed: signing_key.to_bytes(),
            algorithm: KeyAlgorithm::Ed25519,
            user_authentication_required: false,
            validity: None,
            attestation: Attestation {
                certificate_chain: vec![certificate],
            },
        };
        self.storage.put(&namespace, ROOT_KEY, &root.serialize()?)?;
        log::debug!("{}: created attestation root", self.identifier);
        Ok(root)
    }

    fn generate(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        if settings.algorithm != KeyAlgorithm::Ed25519 {
            return Err(SecureAreaError::UnsupportedAlgorithm(
                settings.algorithm.to_string(),
            ));
        }
        let alias = alias.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        // Held from the alias check to the write so a name is claimed once.
        let guard = self.key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let created = self.generate_locked(&alias, settings);
        drop(guard);
        let key_info = created?;
        log::debug!("{}: created key {alias}", self.identifier);
        Ok(key_info)
    }

    fn generate_locked(
        &self,
        alias: &str,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        if self.storage.contains(&self.identifier, alias)? {
            return Err(SecureAreaError::InvalidSettings(format!(
                "a key named {alias} already exists"
            )));
        }

        let root = self.root()?;
        let signing_key = SigningKey::generate(&mut OsRng);
        let leaf = AttestationCertificate {
            issuer: self.identifier.clone(),
            subject_key: PublicKey::new(
                settings.algorithm,
                signing_key.verifying_key().to_bytes().to_vec(),
            ),
            challenge: settings.attestation_challenge.clone(),
            security_level: self.capabilities.security_level,
            user_authentication_required: settings.user_authentication_required,
            not_before: settings.validity.map(|v| v.not_before),
            not_after: settings.validity.map(|v| v.not_after),
            signature: Vec::new(),
        }
        .sign_with(&root.signing_key())?;

        let mut certificate_chain = vec![leaf];
        certificate_chain.extend(root.attestation.certificate_chain.iter().cloned());
        let stored = StoredKey {
            version: RECORD_VERSION,
            seed: signing_key.to_bytes(),
            algorithm: settings.algorithm,
            user_authentication_required: settings.user_authentication_required,
            validity: settings.validity,
            attestation: Attestation { certificate_chain },
        };
        self.storage
            .put(&self.identifier, alias, &stored.serialize()?)?;
        Ok(stored.key_info(alias))
    }

    fn aggregate_attestation(
        &self,
        key_infos: &[KeyInfo],
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<BatchKeyAttestation> {
        let level = self.capabilities.security_level.iso_18045_level().to_string();
        let body = KeyAttestationBody {
            issued_at: now(),
            attested_keys: key_infos
                .iter()
                .map(|info| JsonWebKey::from_public_key(&info.public_key))
                .collect::<Result<_, _>>()?,
            nonce: settings.key_attestation_nonce.clone(),
            key_storage: vec![level.clone()],
            user_authentication: if settings.user_authentication_required {
                vec![level]
            } else {
                Vec::new()
            },
        };
        let root = self.root()?;
        Ok(BatchKeyAttestation::sign(
            &body,
            &root.signing_key(),
            root.attestation.certificate_chain.clone(),
        ))
    }

    fn discard(&self, key_infos: &[KeyInfo]) {
        for info in key_infos {
            if let Err(err) = self.storage.delete(&self.identifier, &info.alias) {
                log::warn!(
                    "{}: failed to discard key {}: {err}",
                    self.identifier,
                    info.alias
                );
            }
        }
    }
}

impl std::fmt::Debug for SoftwareSecureArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSecureArea")
            .field("identifier", &self.identifier)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecureArea for SoftwareSecureArea {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn create_key(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        self.capabilities.check(&self.identifier, settings)?;
        self.generate(alias, settings)
    }

    async fn batch_create_key(
        &self,
        count: usize,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<BatchCreateKeyResult> {
        self.capabilities.check(&self.identifier, settings)?;
        let mut key_infos = Vec::with_capacity(count);
        for _ in 0..count {
            match self.generate(None, settings) {
                Ok(info) => key_infos.push(info),
                Err(err) => {
                    self.discard(&key_infos);
                    return Err(err);
                }
            }
        }

        let aggregate = self.capabilities.batch_key_attestation_supported
            && settings.key_attestation_nonce.is_some();
        if !aggregate {
            return Ok(BatchCreateKeyResult {
                key_infos,
                key_attestation: None,
            });
        }

        let key_attestation = match self.aggregate_attestation(&key_infos, settings) {
            Ok(attestation) => attestation,
            Err(err) => {
                self.discard(&key_infos);
                return Err(err);
            }
        };
        for info in &mut key_infos {
            info.attestation = None;
        }
        log::debug!(
            "{}: attested {} keys in one batch",
            self.identifier,
            key_infos.len()
        );
        Ok(BatchCreateKeyResult {
            key_infos,
            key_attestation: Some(key_attestation),
        })
    }

    async fn key_info(&self, alias: &str) -> SecureAreaResult<KeyInfo> {
        Ok(self.load(alias)?.key_info(alias))
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> SecureAreaResult<Vec<u8>> {
        let stored = self.load(alias)?;
        if let Some(validity) = stored.validity {
            let now = now();
            if now < validity.not_before || now > validity.not_after {
                return Err(SecureAreaError::InvalidSettings(format!(
                    "key {alias} is outside its validity window"
                )));
            }
        }
        Ok(stored.signing_key().sign(message).to_bytes().to_vec())
    }

    async fn delete_key(&self, alias: &str) -> SecureAreaResult<()> {
        if !self.storage.contains(&self.identifier, alias)? {
            return Err(SecureAreaError::KeyNotFound(alias.to_string()));
        }
        self.storage.delete(&self.identifier, alias)?;
        log::debug!("{}: deleted key {alias}", self.identifier);
        Ok(())
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
