use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::attestation::{Attestation, BatchKeyAttestation};
use super::error::{SecureAreaError, SecureAreaResult};

/// Signature algorithm of a key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum KeyAlgorithm {
    /// `EdDSA` over Curve25519.
    #[strum(serialize = "Ed25519")]
    Ed25519,
    /// ECDSA over NIST P-256.
    #[strum(serialize = "P-256")]
    EcP256,
}

/// Public half of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    /// Algorithm the key belongs to.
    pub algorithm: KeyAlgorithm,
    /// Raw encoding: 32 bytes for Ed25519, an uncompressed SEC1 point for P-256.
    pub bytes: Vec<u8>,
}

impl PublicKey {
    /// Creates a public key from its raw encoding.
    #[must_use]
    pub const fn new(algorithm: KeyAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    /// Verifies `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::InvalidSignature`] if the signature does not
    /// verify and [`SecureAreaError::UnsupportedAlgorithm`] for keys this crate
    /// cannot verify with.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> SecureAreaResult<()> {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let bytes: &[u8; 32] = self
                    .bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| SecureAreaError::InvalidSignature)?;
                let key =
                    VerifyingKey::from_bytes(bytes).map_err(|_| SecureAreaError::InvalidSignature)?;
                let signature =
                    Signature::from_slice(signature).map_err(|_| SecureAreaError::InvalidSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| SecureAreaError::InvalidSignature)
            }
            KeyAlgorithm::EcP256 => Err(SecureAreaError::UnsupportedAlgorithm(
                self.algorithm.to_string(),
            )),
        }
    }
}

/// Protection level of the hardware holding a key, weakest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
pub enum SecurityLevel {
    /// Keys live in process memory or on disk.
    Software,
    /// Keys live in a trusted execution environment.
    TrustedEnvironment,
    /// Keys live in a dedicated secure element.
    StrongBox,
}

impl SecurityLevel {
    /// ISO 18045 attack-potential level used in key attestations.
    #[must_use]
    pub const fn iso_18045_level(self) -> &'static str {
        match self {
            Self::Software => "iso_18045_basic",
            Self::TrustedEnvironment => "iso_18045_moderate",
            Self::StrongBox => "iso_18045_high",
        }
    }
}

/// Whether the backend runs on real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionEnvironment {
    /// Physical device.
    Physical,
    /// Emulator or simulator.
    Emulated,
}

/// What a backend can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Key algorithms the backend can create.
    pub algorithms: Vec<KeyAlgorithm>,
    /// A secure lock screen is configured on the device.
    pub secure_lock_screen_setup: bool,
    /// Keys can be gated on user authentication.
    pub user_authentication_supported: bool,
    /// The backend can produce one attestation covering a batch of keys.
    pub batch_key_attestation_supported: bool,
    /// Protection level of created keys.
    pub security_level: SecurityLevel,
    /// Hardware or emulator.
    pub execution_environment: ExecutionEnvironment,
}

impl Capabilities {
    /// Checks that a backend with these capabilities can honour `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::UnsupportedAlgorithm`],
    /// [`SecureAreaError::UnmetCapability`] or
    /// [`SecureAreaError::InvalidSettings`].
    pub fn check(&self, backend: &str, settings: &CreateKeySettings) -> SecureAreaResult<()> {
        if !self.algorithms.contains(&settings.algorithm) {
            return Err(SecureAreaError::UnsupportedAlgorithm(
                settings.algorithm.to_string(),
            ));
        }
        if settings.user_authentication_required {
            if !self.user_authentication_supported {
                return Err(SecureAreaError::UnmetCapability {
                    backend: backend.to_string(),
                    capability: "user authentication",
                });
            }
            if !self.secure_lock_screen_setup {
                return Err(SecureAreaError::UnmetCapability {
                    backend: backend.to_string(),
                    capability: "secure lock screen",
                });
            }
        }
        if let Some(validity) = settings.validity {
            if validity.not_before > validity.not_after {
                return Err(SecureAreaError::InvalidSettings(
                    "validity window ends before it begins".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Period during which a key may be used, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// First valid second.
    pub not_before: u64,
    /// Last valid second.
    pub not_after: u64,
}

/// Parameters for creating a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateKeySettings {
    /// Algorithm of the key.
    pub algorithm: KeyAlgorithm,
    /// Challenge the attestation must carry.
    pub attestation_challenge: Vec<u8>,
    /// Whether signing needs the user to authenticate.
    pub user_authentication_required: bool,
    /// Optional usage window.
    pub validity: Option<ValidityWindow>,
    /// Nonce for an aggregate key attestation in batch creation.
    pub key_attestation_nonce: Option<String>,
    /// Backend specific options, passed through untouched.
    pub options: BTreeMap<String, serde_json::Value>,
}

impl CreateKeySettings {
    /// Settings for an Ed25519 key attested with `attestation_challenge`.
    #[must_use]
    pub fn new(attestation_challenge: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            attestation_challenge: attestation_challenge.into(),
            user_authentication_required: false,
            validity: None,
            key_attestation_nonce: None,
            options: BTreeMap::new(),
        }
    }

    /// Sets the key algorithm.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Requires user authentication before each use of the key.
    #[must_use]
    pub const fn with_user_authentication(mut self, required: bool) -> Self {
        self.user_authentication_required = required;
        self
    }

    /// Limits key usage to a window.
    #[must_use]
    pub const fn with_validity(mut self, not_before: u64, not_after: u64) -> Self {
        self.validity = Some(ValidityWindow {
            not_before,
            not_after,
        });
        self
    }

    /// Requests an aggregate key attestation carrying `nonce`.
    #[must_use]
    pub fn with_key_attestation_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.key_attestation_nonce = Some(nonce.into());
        self
    }

    /// Adds a backend specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Description of an existing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Alias the key is stored under.
    pub alias: String,
    /// Public half of the key.
    pub public_key: PublicKey,
    /// Attestation, absent when covered by a batch attestation.
    pub attestation: Option<Attestation>,
    /// Whether signing needs the user to authenticate.
    pub user_authentication_required: bool,
    /// Usage window, if any.
    pub validity: Option<ValidityWindow>,
    /// Backend specific details.
    pub metadata: BTreeMap<String, String>,
}

/// Outcome of a batch key creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreateKeyResult {
    /// Created keys, in request order.
    pub key_infos: Vec<KeyInfo>,
    /// Single attestation covering every key, when the backend produced one.
    pub key_attestation: Option<BatchKeyAttestation>,
}
