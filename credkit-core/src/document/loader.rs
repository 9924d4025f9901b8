use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DocumentError, DocumentResult};
use super::types::{Credential, KEYLESS_CREDENTIAL, SECURE_AREA_BOUND_CREDENTIAL};

/// Reconstructs a credential of one type from its decoded record.
///
/// The function may validate or normalise the record and rejects it with an
/// error when it does not fit the type.
pub type CredentialFactory = Arc<dyn Fn(Credential) -> DocumentResult<Credential> + Send + Sync>;

/// Maps credential type discriminators to their [`CredentialFactory`].
#[derive(Clone, Default)]
pub struct CredentialLoader {
    implementations: HashMap<String, CredentialFactory>,
}

impl CredentialLoader {
    /// Creates a loader that knows no types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader for [`SECURE_AREA_BOUND_CREDENTIAL`] and
    /// [`KEYLESS_CREDENTIAL`].
    #[must_use]
    pub fn with_builtin_types() -> Self {
        let mut loader = Self::new();
        loader.add_credential_implementation(
            SECURE_AREA_BOUND_CREDENTIAL,
            Arc::new(|credential: Credential| {
                if credential.has_secure_area_binding() {
                    Ok(credential)
                } else {
                    Err(DocumentError::CorruptedRecord(format!(
                        "credential {} is missing its secure area binding",
                        credential.identifier
                    )))
                }
            }),
        );
        loader.add_credential_implementation(
            KEYLESS_CREDENTIAL,
            Arc::new(|credential: Credential| {
                if credential.has_secure_area_binding() {
                    Err(DocumentError::CorruptedRecord(format!(
                        "keyless credential {} has a secure area binding",
                        credential.identifier
                    )))
                } else {
                    Ok(credential)
                }
            }),
        );
        loader
    }

    /// Registers `factory` for `credential_type`, replacing any previous one.
    pub fn add_credential_implementation(
        &mut self,
        credential_type: impl Into<String>,
        factory: CredentialFactory,
    ) {
        self.implementations.insert(credential_type.into(), factory);
    }

    /// Whether a factory is registered for `credential_type`.
    #[must_use]
    pub fn is_registered(&self, credential_type: &str) -> bool {
        self.implementations.contains_key(credential_type)
    }

    /// Runs the factory registered for the credential's type.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::UnknownCredentialType`] if no factory is
    /// registered, or whatever the factory rejects the record with.
    pub fn load(&self, credential: Credential) -> DocumentResult<Credential> {
        let factory = self
            .implementations
            .get(&credential.credential_type)
            .ok_or_else(|| DocumentError::UnknownCredentialType(credential.credential_type.clone()))?;
        factory(credential)
    }
}

impl fmt::Debug for CredentialLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.implementations.keys().collect();
        types.sort();
        f.debug_struct("CredentialLoader")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CredentialState;

    fn keyless(credential_type: &str) -> Credential {
        Credential {
            identifier: "c".to_string(),
            document_id: "d".to_string(),
            credential_type: credential_type.to_string(),
            domain: "domain".to_string(),
            replacement_for: None,
            binding: None,
            state: CredentialState::Pending,
            usage_count: 0,
        }
    }

    #[test]
    fn test_unknown_type() {
        let loader = CredentialLoader::new();
        assert!(!loader.is_registered(KEYLESS_CREDENTIAL));
        match loader.load(keyless(KEYLESS_CREDENTIAL)) {
            Err(DocumentError::UnknownCredentialType(name)) => {
                assert_eq!(name, KEYLESS_CREDENTIAL);
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_builtin_types_validate_binding() {
        let loader = CredentialLoader::with_builtin_types();
        assert!(loader.load(keyless(KEYLESS_CREDENTIAL)).is_ok());
        assert!(matches!(
            loader.load(keyless(SECURE_AREA_BOUND_CREDENTIAL)),
            Err(DocumentError::CorruptedRecord(_))
        ));
    }

    #[test]
    fn test_custom_type() {
        let mut loader = CredentialLoader::new();
        loader.add_credential_implementation(
            "Annotated",
            Arc::new(|mut credential: Credential| {
                credential.domain = format!("annotated:{}", credential.domain);
                Ok(credential)
            }),
        );
        let loaded = loader.load(keyless("Annotated")).expect("load");
        assert_eq!(loaded.domain, "annotated:domain");
    }
}
