//! Key attestations.
//!
//! An [`Attestation`] is a chain of [`AttestationCertificate`]s, leaf first.
//! Every certificate is signed by the subject key of the next one and the
//! last certificate is self-signed. Signatures cover the CBOR encoding of the
//! certificate without its signature.
//!
//! A [`BatchKeyAttestation`] covers many keys at once: a compact JWS whose
//! payload is a [`KeyAttestationBody`], signed by the leaf of its own chain.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::error::{SecureAreaError, SecureAreaResult};
use super::types::{Capabilities, ExecutionEnvironment, PublicKey, SecurityLevel};
use crate::sdjwt::{envelope, ClaimBody, ClaimSet, KeyAttestationBody};

const JWS_ALGORITHM: &str = "EdDSA";
const JWS_TYPE: &str = "key-attestation+jwt";

/// One link of an attestation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationCertificate {
    /// Name of the entity that signed this certificate.
    pub issuer: String,
    /// Key this certificate vouches for.
    pub subject_key: PublicKey,
    /// Challenge supplied when the key was created.
    pub challenge: Vec<u8>,
    /// Protection level of the subject key.
    pub security_level: SecurityLevel,
    /// Whether the subject key requires user authentication.
    pub user_authentication_required: bool,
    /// Start of the key's validity, if limited.
    pub not_before: Option<u64>,
    /// End of the key's validity, if limited.
    pub not_after: Option<u64>,
    /// Issuer signature over the other fields.
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct ToBeSigned<'a> {
    issuer: &'a str,
    subject_key: &'a PublicKey,
    challenge: &'a [u8],
    security_level: SecurityLevel,
    user_authentication_required: bool,
    not_before: Option<u64>,
    not_after: Option<u64>,
}

impl AttestationCertificate {
    fn to_be_signed(&self) -> SecureAreaResult<Vec<u8>> {
        let tbs = ToBeSigned {
            issuer: &self.issuer,
            subject_key: &self.subject_key,
            challenge: &self.challenge,
            security_level: self.security_level,
            user_authentication_required: self.user_authentication_required,
            not_before: self.not_before,
            not_after: self.not_after,
        };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&tbs, &mut bytes)
            .map_err(|err| SecureAreaError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    pub(crate) fn sign_with(mut self, issuer_key: &SigningKey) -> SecureAreaResult<Self> {
        let tbs = self.to_be_signed()?;
        self.signature = issuer_key.sign(&tbs).to_bytes().to_vec();
        Ok(self)
    }

    /// Verifies this certificate's signature with `issuer_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::InvalidSignature`] if it does not verify.
    pub fn verify_signed_by(&self, issuer_key: &PublicKey) -> SecureAreaResult<()> {
        issuer_key.verify(&self.to_be_signed()?, &self.signature)
    }
}

/// Attestation of a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Certificates from the attested key up to the self-signed root.
    pub certificate_chain: Vec<AttestationCertificate>,
}

impl Attestation {
    /// Certificate of the attested key.
    #[must_use]
    pub fn leaf(&self) -> Option<&AttestationCertificate> {
        self.certificate_chain.first()
    }

    /// Challenge carried by the leaf.
    #[must_use]
    pub fn challenge(&self) -> Option<&[u8]> {
        self.leaf().map(|leaf| leaf.challenge.as_slice())
    }

    /// Protection level claimed by the leaf.
    #[must_use]
    pub fn security_level(&self) -> Option<SecurityLevel> {
        self.leaf().map(|leaf| leaf.security_level)
    }

    /// Checks, in constant time, that the leaf carries `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::AttestationMismatch`] if the challenge
    /// differs or the chain is empty.
    pub fn verify_challenge(&self, expected: &[u8]) -> SecureAreaResult<()> {
        let matches = self
            .challenge()
            .is_some_and(|challenge| bool::from(challenge.ct_eq(expected)));
        if matches {
            Ok(())
        } else {
            Err(SecureAreaError::AttestationMismatch)
        }
    }

    /// Verifies every signature in the chain up to the self-signed root.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::InvalidAttestation`] for an empty or broken chain.
    pub fn verify_chain(&self) -> SecureAreaResult<()> {
        verify_chain(&self.certificate_chain)
    }
}

fn verify_chain(chain: &[AttestationCertificate]) -> SecureAreaResult<()> {
    let Some(root) = chain.last() else {
        return Err(SecureAreaError::InvalidAttestation(
            "empty certificate chain".to_string(),
        ));
    };
    for (index, pair) in chain.windows(2).enumerate() {
        pair[0]
            .verify_signed_by(&pair[1].subject_key)
            .map_err(|_| {
                SecureAreaError::InvalidAttestation(format!(
                    "certificate {index} is not signed by its issuer"
                ))
            })?;
    }
    root.verify_signed_by(&root.subject_key).map_err(|_| {
        SecureAreaError::InvalidAttestation("root certificate is not self-signed".to_string())
    })
}

/// Caller policy for accepting an attestation.
///
/// Emulators cannot produce hardware-backed keys; `relax_on_emulator` lets
/// development builds accept them when the backend reports
/// [`ExecutionEnvironment::Emulated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRequirement {
    /// Weakest acceptable protection level.
    pub minimum: SecurityLevel,
    /// Accept any level on an emulator.
    pub relax_on_emulator: bool,
}

impl SecurityRequirement {
    /// Whether `attestation`, produced by a backend with `capabilities`,
    /// satisfies this requirement.
    #[must_use]
    pub fn is_satisfied_by(&self, attestation: &Attestation, capabilities: &Capabilities) -> bool {
        if self.relax_on_emulator
            && capabilities.execution_environment == ExecutionEnvironment::Emulated
        {
            return true;
        }
        attestation
            .security_level()
            .is_some_and(|level| level >= self.minimum)
    }
}

/// Aggregate attestation covering a batch of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchKeyAttestation {
    /// Compact JWS (`header.payload.signature`) over a [`KeyAttestationBody`].
    pub jws: String,
    /// Chain of the signing key, leaf first.
    pub certificate_chain: Vec<AttestationCertificate>,
}

impl BatchKeyAttestation {
    pub(crate) fn sign(
        body: &KeyAttestationBody,
        signer: &SigningKey,
        certificate_chain: Vec<AttestationCertificate>,
    ) -> Self {
        let mut header = ClaimSet::new();
        header.insert("alg".to_string(), Value::from(JWS_ALGORITHM));
        header.insert("typ".to_string(), Value::from(JWS_TYPE));
        let signing_input = format!("{}.{}", envelope::encode(&header), body.encode());
        let signature = signer.sign(signing_input.as_bytes()).to_bytes();
        Self {
            jws: format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)),
            certificate_chain,
        }
    }

    fn parts(&self) -> SecureAreaResult<(&str, &str, &str)> {
        let mut parts = self.jws.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None) => {
                Ok((header, payload, signature))
            }
            _ => Err(SecureAreaError::InvalidAttestation(
                "key attestation is not a compact JWS".to_string(),
            )),
        }
    }

    /// Decodes the payload without checking the signature.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::InvalidAttestation`] for a malformed JWS and
    /// [`SecureAreaError::Claims`] for a malformed payload.
    pub fn body(&self) -> SecureAreaResult<KeyAttestationBody> {
        let (_, payload, _) = self.parts()?;
        Ok(KeyAttestationBody::decode(payload)?)
    }

    /// Verifies the certificate chain and the JWS signature, then returns the payload.
    ///
    /// # Errors
    ///
    /// Returns [`SecureAreaError::InvalidAttestation`] if the chain or the
    /// header is wrong and [`SecureAreaError::InvalidSignature`] if the JWS
    /// does not verify.
    pub fn verify(&self) -> SecureAreaResult<KeyAttestationBody> {
        verify_chain(&self.certificate_chain)?;
        let leaf = self.certificate_chain.first().ok_or_else(|| {
            SecureAreaError::InvalidAttestation("empty certificate chain".to_string())
        })?;
        let (header, payload, signature) = self.parts()?;
        let claims = envelope::decode(header)?;
        if claims.get("alg").and_then(Value::as_str) != Some(JWS_ALGORITHM) {
            return Err(SecureAreaError::InvalidAttestation(
                "unexpected JWS algorithm".to_string(),
            ));
        }
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SecureAreaError::InvalidSignature)?;
        leaf.subject_key
            .verify(format!("{header}.{payload}").as_bytes(), &signature)?;
        Ok(KeyAttestationBody::decode(payload)?)
    }
}
