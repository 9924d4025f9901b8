//! Document store lifecycle tests across storage and secure area backends.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use credkit_core::document::{DocumentError, IssuerProof};
use credkit_core::sdjwt::{ClaimBody, HashAlgorithm, JsonWebKey, JwtBody, KeyBindingBody};
use credkit_core::secure_area::{
    Attestation, Capabilities, CreateKeySettings, KeyInfo, SecureArea, SecureAreaError,
    SecureAreaResult, SoftwareSecureArea, SOFTWARE_SECURE_AREA_IDENTIFIER,
};
use credkit_core::storage::{FileStorage, MemoryStorage, Storage};

const DOMAIN: &str = "mdoc";
const CHALLENGE: &[u8] = b"issuer-challenge";

fn memory() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::new())
}

/// Backend that ignores the requested challenge.
struct WrongChallengeArea {
    inner: SoftwareSecureArea,
}

#[async_trait]
impl SecureArea for WrongChallengeArea {
    fn identifier(&self) -> &str {
        "WrongChallenge"
    }

    fn display_name(&self) -> &str {
        "Wrong challenge"
    }

    fn capabilities(&self) -> &Capabilities {
        self.inner.capabilities()
    }

    async fn create_key(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        let mut tampered = settings.clone();
        tampered.attestation_challenge = b"something else".to_vec();
        self.inner.create_key(alias, &tampered).await
    }

    async fn key_info(&self, alias: &str) -> SecureAreaResult<KeyInfo> {
        self.inner.key_info(alias).await
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> SecureAreaResult<Vec<u8>> {
        self.inner.sign(alias, message).await
    }

    async fn delete_key(&self, alias: &str) -> SecureAreaResult<()> {
        self.inner.delete_key(alias).await
    }
}

/// Backend that creates the key and then never returns.
struct StalledArea {
    inner: SoftwareSecureArea,
}

#[async_trait]
impl SecureArea for StalledArea {
    fn identifier(&self) -> &str {
        "Stalled"
    }

    fn display_name(&self) -> &str {
        "Stalled"
    }

    fn capabilities(&self) -> &Capabilities {
        self.inner.capabilities()
    }

    async fn create_key(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        let info = self.inner.create_key(alias, settings).await?;
        std::future::pending::<()>().await;
        Ok(info)
    }

    async fn key_info(&self, alias: &str) -> SecureAreaResult<KeyInfo> {
        self.inner.key_info(alias).await
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> SecureAreaResult<Vec<u8>> {
        self.inner.sign(alias, message).await
    }

    async fn delete_key(&self, alias: &str) -> SecureAreaResult<()> {
        self.inner.delete_key(alias).await
    }
}

/// Backend that fails once `remaining` keys have been created. It keeps the
/// default `batch_create_key`.
struct ExhaustedArea {
    inner: SoftwareSecureArea,
    remaining: AtomicUsize,
}

#[async_trait]
impl SecureArea for ExhaustedArea {
    fn identifier(&self) -> &str {
        "Exhausted"
    }

    fn display_name(&self) -> &str {
        "Exhausted"
    }

    fn capabilities(&self) -> &Capabilities {
        self.inner.capabilities()
    }

    async fn create_key(
        &self,
        alias: Option<&str>,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyInfo> {
        let claimed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if claimed.is_err() {
            return Err(SecureAreaError::Backend("out of key slots".to_string()));
        }
        self.inner.create_key(alias, settings).await
    }

    async fn key_info(&self, alias: &str) -> SecureAreaResult<KeyInfo> {
        self.inner.key_info(alias).await
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> SecureAreaResult<Vec<u8>> {
        self.inner.sign(alias, message).await
    }

    async fn delete_key(&self, alias: &str) -> SecureAreaResult<()> {
        self.inner.delete_key(alias).await
    }
}

#[tokio::test]
async fn test_credential_lifecycle_end_to_end() {
    let storage = memory();
    let store = common::create_test_document_store(&storage, Vec::new());
    let document = store.create_document().expect("document");

    let credential = store
        .create_credential(
            &document,
            DOMAIN,
            SOFTWARE_SECURE_AREA_IDENTIFIER,
            &CreateKeySettings::new(CHALLENGE),
            None,
        )
        .await
        .expect("create credential");
    assert!(!credential.is_certified());

    // The attestation is what the issuer sees before certifying.
    let attestation = store.get_attestation(&credential).await.expect("attestation");
    attestation.verify_chain().expect("chain");
    attestation.verify_challenge(CHALLENGE).expect("challenge");
    let binding = credential.binding.clone().expect("binding");
    assert_eq!(
        attestation.leaf().map(|leaf| &leaf.subject_key),
        Some(&binding.public_key)
    );

    // Issuer data: an SD-JWT body bound to the attested key.
    let issuer_body = JwtBody::new(
        vec!["abc".to_string(), "def".to_string()],
        HashAlgorithm::Sha256,
        "https://issuer.example",
        "org.example.pid",
    )
    .with_validity(1_700_000_000, 1_800_000_000)
    .with_public_key(JsonWebKey::from_public_key(&binding.public_key).expect("jwk"));
    let issuer_data = issuer_body.encode();
    let certified = store
        .certify(
            &credential,
            IssuerProof::new(issuer_data.clone().into_bytes(), 1_700_000_000, 1_800_000_000),
        )
        .expect("certify");
    assert!(certified.is_certified());

    let selected = store
        .find_credential(&document, DOMAIN, 1_750_000_000)
        .expect("find")
        .expect("certified credential");
    assert_eq!(selected.identifier, credential.identifier);
    let decoded = JwtBody::decode(
        std::str::from_utf8(&selected.issuer_proof().expect("proof").issuer_data).expect("utf8"),
    )
    .expect("decode issuer body");
    assert_eq!(decoded, issuer_body);

    // Presentation: sign a key-binding body with the credential's key.
    let presented = format!("{issuer_data}~");
    let kb = KeyBindingBody::bind(
        "n1",
        "verifier.example",
        1_750_000_000,
        HashAlgorithm::Sha256,
        &presented,
    );
    let area = store
        .secure_area_repository()
        .lookup(&binding.secure_area_id)
        .expect("area");
    let signature = area.sign(&binding.alias, kb.encode().as_bytes()).await.expect("sign");
    binding
        .public_key
        .verify(kb.encode().as_bytes(), &signature)
        .expect("signature");
    assert!(KeyBindingBody::decode(&kb.encode())
        .expect("decode")
        .binds(HashAlgorithm::Sha256, &presented));

    store.increment_usage_count(&selected).expect("use");
    let stored = store
        .lookup_credential(&credential.identifier)
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.usage_count, 1);
}

#[tokio::test]
async fn test_unknown_secure_area_leaves_no_credential() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    let document = store.create_document().expect("document");

    match store
        .create_credential(
            &document,
            DOMAIN,
            "NotRegistered",
            &CreateKeySettings::new(CHALLENGE),
            None,
        )
        .await
    {
        Err(DocumentError::UnknownSecureArea(identifier)) => {
            assert_eq!(identifier, "NotRegistered");
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("expected error"),
    }
    let reloaded = store
        .lookup_document(document.identifier())
        .expect("lookup")
        .expect("document");
    assert!(reloaded.credentials().is_empty());
}

#[tokio::test]
async fn test_lookup_of_absent_document() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    assert!(store.lookup_document("missing").expect("lookup").is_none());
    assert!(store.list_documents().expect("list").is_empty());
}

#[tokio::test]
async fn test_challenge_mismatch_is_rejected_and_key_discarded() {
    let storage = memory();
    let wrong = Arc::new(WrongChallengeArea {
        inner: SoftwareSecureArea::new(Arc::clone(&storage)).with_identifier("WrongChallenge"),
    });
    let store = common::create_test_document_store(&storage, vec![wrong]);
    let document = store.create_document().expect("document");

    match store
        .create_credential(
            &document,
            DOMAIN,
            "WrongChallenge",
            &CreateKeySettings::new(CHALLENGE),
            None,
        )
        .await
    {
        Err(DocumentError::SecureArea(SecureAreaError::AttestationMismatch)) => {}
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("expected error"),
    }
    assert!(store
        .lookup_document(document.identifier())
        .expect("lookup")
        .expect("document")
        .credentials()
        .is_empty());
    assert!(storage.keys("WrongChallenge").expect("keys").is_empty());
}

#[tokio::test]
async fn test_concurrent_certify_has_single_winner() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    let document = store.create_document().expect("document");
    let credential = store
        .create_credential(
            &document,
            DOMAIN,
            SOFTWARE_SECURE_AREA_IDENTIFIER,
            &CreateKeySettings::new(CHALLENGE),
            None,
        )
        .await
        .expect("create credential");

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0u8..8)
            .map(|i| {
                let store = &store;
                let credential = &credential;
                scope.spawn(move || store.certify(credential, IssuerProof::new(vec![i], 0, 100)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        match result {
            Ok(_) | Err(DocumentError::InvalidTransition { .. }) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    let stored = store
        .lookup_credential(&credential.identifier)
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.issuer_proof(), winners[0].issuer_proof());
}

#[tokio::test]
async fn test_cancelled_creation_leaves_no_credential() {
    let storage = memory();
    let stalled = Arc::new(StalledArea {
        inner: SoftwareSecureArea::new(Arc::clone(&storage)).with_identifier("Stalled"),
    });
    let store = common::create_test_document_store(&storage, vec![stalled]);
    let document = store.create_document().expect("document");

    let settings = CreateKeySettings::new(CHALLENGE);
    let creation = store.create_credential(&document, DOMAIN, "Stalled", &settings, None);
    let outcome = tokio::time::timeout(Duration::from_millis(200), creation).await;
    assert!(outcome.is_err(), "creation should have been cancelled");
    // The backend got as far as creating the key.
    assert_eq!(storage.keys("Stalled").expect("keys").len(), 1);

    let reloaded = store
        .lookup_document(document.identifier())
        .expect("lookup")
        .expect("document");
    assert!(reloaded.credentials().is_empty());
    assert!(reloaded.pending_credentials().next().is_none());
}

#[tokio::test]
async fn test_documents_survive_reopening_file_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (document_id, credential) = {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).expect("storage"));
        let store = common::create_test_document_store(&storage, Vec::new());
        let document = store.create_document().expect("document");
        let credential = store
            .create_credential(
                &document,
                DOMAIN,
                SOFTWARE_SECURE_AREA_IDENTIFIER,
                &CreateKeySettings::new(CHALLENGE),
                None,
            )
            .await
            .expect("create credential");
        let certified = store
            .certify(&credential, IssuerProof::new(b"issuer".to_vec(), 0, 100))
            .expect("certify");
        (document.identifier().to_string(), certified)
    };

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).expect("storage"));
    let store = common::create_test_document_store(&storage, Vec::new());
    assert_eq!(store.list_documents().expect("list"), vec![document_id.clone()]);
    let document = store
        .lookup_document(&document_id)
        .expect("lookup")
        .expect("document");
    assert_eq!(document.credentials(), &[credential.clone()]);

    let attestation: Attestation = store.get_attestation(&credential).await.expect("attestation");
    attestation.verify_challenge(CHALLENGE).expect("challenge");
    let binding = credential.binding.expect("binding");
    let area = store
        .secure_area_repository()
        .lookup(SOFTWARE_SECURE_AREA_IDENTIFIER)
        .expect("area");
    let signature = area.sign(&binding.alias, b"message").await.expect("sign");
    binding
        .public_key
        .verify(b"message", &signature)
        .expect("signature");
}

#[tokio::test]
async fn test_batch_creation_with_key_attestation() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    let document = store.create_document().expect("document");
    let settings = CreateKeySettings::new(CHALLENGE).with_key_attestation_nonce("issuer-nonce");

    let result = store
        .batch_create_credentials(&document, DOMAIN, SOFTWARE_SECURE_AREA_IDENTIFIER, &settings, 3)
        .await
        .expect("batch");
    assert_eq!(result.credentials.len(), 3);

    let body = result
        .key_attestation
        .expect("aggregate attestation")
        .verify()
        .expect("verify");
    assert_eq!(body.nonce.as_deref(), Some("issuer-nonce"));
    let attested: Vec<_> = body
        .attested_keys
        .iter()
        .map(|jwk| jwk.to_public_key().expect("key"))
        .collect();
    let bound: Vec<_> = result
        .credentials
        .iter()
        .map(|credential| credential.binding.clone().expect("binding").public_key)
        .collect();
    assert_eq!(attested, bound);

    let reloaded = store
        .lookup_document(document.identifier())
        .expect("lookup")
        .expect("document");
    assert_eq!(reloaded.pending_credentials().count(), 3);
}

#[tokio::test]
async fn test_batch_creation_without_nonce_attests_each_key() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    let document = store.create_document().expect("document");

    let result = store
        .batch_create_credentials(
            &document,
            DOMAIN,
            SOFTWARE_SECURE_AREA_IDENTIFIER,
            &CreateKeySettings::new(CHALLENGE),
            2,
        )
        .await
        .expect("batch");
    assert!(result.key_attestation.is_none());
    for credential in &result.credentials {
        store
            .get_attestation(credential)
            .await
            .expect("attestation")
            .verify_challenge(CHALLENGE)
            .expect("challenge");
    }
}

#[tokio::test]
async fn test_unmet_capability_is_rejected() {
    let store = common::create_test_document_store(&memory(), Vec::new());
    let document = store.create_document().expect("document");

    match store
        .create_credential(
            &document,
            DOMAIN,
            SOFTWARE_SECURE_AREA_IDENTIFIER,
            &CreateKeySettings::new(CHALLENGE).with_user_authentication(true),
            None,
        )
        .await
    {
        Err(DocumentError::SecureArea(SecureAreaError::UnmetCapability { capability, .. })) => {
            assert_eq!(capability, "user authentication");
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("expected error"),
    }
}

#[tokio::test]
async fn test_failed_default_batch_deletes_created_keys() {
    let storage = memory();
    let area = ExhaustedArea {
        inner: SoftwareSecureArea::new(Arc::clone(&storage)).with_identifier("Exhausted"),
        remaining: AtomicUsize::new(2),
    };
    let store = common::create_test_document_store(&storage, vec![Arc::new(area)]);
    let document = store.create_document().expect("document");

    match store
        .batch_create_credentials(
            &document,
            DOMAIN,
            "Exhausted",
            &CreateKeySettings::new(CHALLENGE),
            5,
        )
        .await
    {
        Err(DocumentError::SecureArea(SecureAreaError::Backend(_))) => {}
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("expected error"),
    }
    assert!(storage.keys("Exhausted").expect("keys").is_empty());
    let reloaded = store
        .lookup_document(document.identifier())
        .expect("lookup")
        .expect("present");
    assert!(reloaded.credentials().is_empty());
}

#[tokio::test]
async fn test_lookup_of_unaddressable_id_over_file_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).expect("storage"));
    let store = common::create_test_document_store(&storage, Vec::new());
    assert!(store.lookup_document("").expect("lookup").is_none());
    assert!(store.lookup_credential("").expect("lookup").is_none());
    assert!(store.lookup_document("missing").expect("lookup").is_none());
}
