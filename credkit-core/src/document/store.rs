//! The document store.
//!
//! Persistence layout in the [`Storage`] collaborator:
//!
//! | namespace    | key                   | value                |
//! |--------------|-----------------------|----------------------|
//! | `document`   | document identifier   | [`DocumentRecord`]   |
//! | `credential` | credential identifier | [`CredentialRecord`] |
//!
//! A credential record is always written before the document record that
//! references it and a document record always drops a reference before the
//! credential record goes away, so readers never see a dangling identifier.
//!
//! Secure-area calls happen outside the store lock. Everything that persists
//! state runs synchronously while holding it, which makes every mutation
//! all-or-nothing with respect to cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use super::error::{DocumentError, DocumentResult};
use super::loader::CredentialLoader;
use super::metadata::{DocumentMetadata, DocumentMetadataFactory};
use super::records::{CredentialRecord, DocumentRecord};
use super::types::{
    Credential, CredentialState, CredentialStatus, Document, IssuerProof, SecureAreaBinding,
    KEYLESS_CREDENTIAL, SECURE_AREA_BOUND_CREDENTIAL,
};
use crate::sdjwt::JsonWebKey;
use crate::secure_area::{
    Attestation, BatchKeyAttestation, CreateKeySettings, KeyInfo, SecureArea, SecureAreaError,
    SecureAreaRepository,
};
use crate::storage::{Storage, StorageError};

const DOCUMENT_NAMESPACE: &str = "document";
const CREDENTIAL_NAMESPACE: &str = "credential";

/// Credentials created by one batch key creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreateCredentialsResult {
    /// Pending credentials, one per created key.
    pub credentials: Vec<Credential>,
    /// Aggregate attestation of the keys, when the backend produced one.
    pub key_attestation: Option<BatchKeyAttestation>,
}

/// Owns documents and drives their credentials through `Pending -> Certified`.
pub struct DocumentStore {
    repository: SecureAreaRepository,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    storage: Arc<dyn Storage>,
    loader: CredentialLoader,
    metadata_factory: DocumentMetadataFactory,
    documents: HashMap<String, CachedDocument>,
}

#[derive(Clone)]
struct CachedDocument {
    metadata: Arc<dyn DocumentMetadata>,
    credential_ids: Vec<String>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Creates a store over `storage`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        repository: SecureAreaRepository,
        loader: CredentialLoader,
        metadata_factory: DocumentMetadataFactory,
    ) -> Self {
        Self {
            repository,
            inner: Mutex::new(StoreInner {
                storage,
                loader,
                metadata_factory,
                documents: HashMap::new(),
            }),
        }
    }

    /// Registry used to resolve secure-area identifiers.
    #[must_use]
    pub const fn secure_area_repository(&self) -> &SecureAreaRepository {
        &self.repository
    }

    // Documents

    /// Creates and persists an empty document.
    ///
    /// # Errors
    ///
    /// Fails if the metadata factory or the storage fails.
    pub fn create_document(&self) -> DocumentResult<Document> {
        self.lock_inner()?.create_document()
    }

    /// Returns the document, or `None` if no document has that identifier.
    ///
    /// # Errors
    ///
    /// Fails if persisted records cannot be read or decoded.
    pub fn lookup_document(&self, identifier: &str) -> DocumentResult<Option<Document>> {
        self.lock_inner()?.snapshot(identifier)
    }

    /// Identifiers of all persisted documents, sorted.
    ///
    /// # Errors
    ///
    /// Fails if the storage cannot be listed.
    pub fn list_documents(&self) -> DocumentResult<Vec<String>> {
        Ok(self.lock_inner()?.storage.keys(DOCUMENT_NAMESPACE)?)
    }

    /// Persists the current state of the document's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DocumentNotFound`] if the document was deleted.
    pub fn save_metadata(&self, document: &Document) -> DocumentResult<()> {
        self.lock_inner()?.save_metadata(document)
    }

    /// Deletes the document, its credentials and their keys.
    ///
    /// The document record is removed first. Credential records and keys
    /// are then removed best effort: failures are logged and every key is
    /// still attempted.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DocumentNotFound`] for an unknown identifier.
    pub async fn delete_document(&self, identifier: &str) -> DocumentResult<()> {
        let credentials = self.lock_inner()?.delete_document(identifier)?;
        for credential in &credentials {
            self.delete_key_best_effort(credential).await;
        }
        Ok(())
    }

    // Credentials

    /// Creates a Pending [`SECURE_AREA_BOUND_CREDENTIAL`] backed by a new key
    /// of the secure area registered as `secure_area_id`.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::create_credential_of_type`].
    pub async fn create_credential(
        &self,
        document: &Document,
        domain: &str,
        secure_area_id: &str,
        settings: &CreateKeySettings,
        replacement_for: Option<&str>,
    ) -> DocumentResult<Credential> {
        self.create_credential_of_type(
            document,
            SECURE_AREA_BOUND_CREDENTIAL,
            domain,
            secure_area_id,
            settings,
            replacement_for,
        )
        .await
    }

    /// Creates a Pending credential of a registered, key-bound type.
    ///
    /// The key is created first. Its attestation must carry
    /// `settings.attestation_challenge`; otherwise the key is deleted again
    /// and nothing is persisted. Dropping the returned future before it
    /// completes leaves no credential behind.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::UnknownCredentialType`] if the loader lacks `credential_type`.
    /// - [`DocumentError::UnknownSecureArea`] if `secure_area_id` is not registered.
    /// - [`DocumentError::InvalidReplacement`] if `replacement_for` is not a
    ///   credential of the same document and domain.
    /// - [`DocumentError::SecureArea`] with [`SecureAreaError::AttestationMismatch`]
    ///   if the attestation carries another challenge, or any backend error.
    pub async fn create_credential_of_type(
        &self,
        document: &Document,
        credential_type: &str,
        domain: &str,
        secure_area_id: &str,
        settings: &CreateKeySettings,
        replacement_for: Option<&str>,
    ) -> DocumentResult<Credential> {
        self.lock_inner()?.check_creatable(
            credential_type,
            document.identifier(),
            domain,
            replacement_for,
        )?;
        let area = self.secure_area(secure_area_id)?;

        let key_info = area.create_key(None, settings).await?;
        let verified = key_info
            .attestation
            .as_ref()
            .ok_or(SecureAreaError::AttestationMismatch)
            .and_then(|attestation| attestation.verify_challenge(&settings.attestation_challenge));
        if let Err(err) = verified {
            log::warn!(
                "{secure_area_id}: attestation of key {} does not carry the requested challenge",
                key_info.alias
            );
            discard_key(area.as_ref(), &key_info.alias).await;
            return Err(err.into());
        }

        let alias = key_info.alias.clone();
        let credential = bound_credential(
            document.identifier(),
            credential_type,
            domain,
            secure_area_id,
            key_info,
            replacement_for,
        );
        let persisted = self.lock_inner().and_then(|mut inner| {
            inner.persist_new(document.identifier(), domain, vec![credential], replacement_for)
        });
        match persisted {
            Ok(mut created) => Ok(created.remove(0)),
            Err(err) => {
                discard_key(area.as_ref(), &alias).await;
                Err(err)
            }
        }
    }

    /// Creates `count` Pending [`SECURE_AREA_BOUND_CREDENTIAL`]s from one
    /// batch key creation.
    ///
    /// When the backend returns an aggregate attestation it is verified and
    /// must carry `settings.key_attestation_nonce`; otherwise every key's own
    /// attestation must carry `settings.attestation_challenge`.
    ///
    /// # Errors
    ///
    /// As for [`DocumentStore::create_credential`]. On failure every created
    /// key is deleted again.
    pub async fn batch_create_credentials(
        &self,
        document: &Document,
        domain: &str,
        secure_area_id: &str,
        settings: &CreateKeySettings,
        count: usize,
    ) -> DocumentResult<BatchCreateCredentialsResult> {
        self.lock_inner()?.check_creatable(
            SECURE_AREA_BOUND_CREDENTIAL,
            document.identifier(),
            domain,
            None,
        )?;
        let area = self.secure_area(secure_area_id)?;

        let result = area.batch_create_key(count, settings).await?;
        let aliases: Vec<String> = result
            .key_infos
            .iter()
            .map(|info| info.alias.clone())
            .collect();
        if let Err(err) = verify_batch(&result.key_infos, result.key_attestation.as_ref(), settings)
        {
            log::warn!("{secure_area_id}: batch attestation rejected: {err}");
            for alias in &aliases {
                discard_key(area.as_ref(), alias).await;
            }
            return Err(err.into());
        }

        let credentials = result
            .key_infos
            .into_iter()
            .map(|key_info| {
                bound_credential(
                    document.identifier(),
                    SECURE_AREA_BOUND_CREDENTIAL,
                    domain,
                    secure_area_id,
                    key_info,
                    None,
                )
            })
            .collect();
        let persisted = self.lock_inner().and_then(|mut inner| {
            inner.persist_new(document.identifier(), domain, credentials, None)
        });
        match persisted {
            Ok(credentials) => Ok(BatchCreateCredentialsResult {
                credentials,
                key_attestation: result.key_attestation,
            }),
            Err(err) => {
                for alias in &aliases {
                    discard_key(area.as_ref(), alias).await;
                }
                Err(err)
            }
        }
    }

    /// Creates a Pending [`KEYLESS_CREDENTIAL`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::UnknownCredentialType`] if the loader lacks the
    /// type, [`DocumentError::InvalidReplacement`] or
    /// [`DocumentError::DocumentNotFound`].
    pub fn create_keyless_credential(
        &self,
        document: &Document,
        domain: &str,
        replacement_for: Option<&str>,
    ) -> DocumentResult<Credential> {
        let mut inner = self.lock_inner()?;
        inner.check_creatable(KEYLESS_CREDENTIAL, document.identifier(), domain, replacement_for)?;
        let credential = Credential {
            identifier: Uuid::new_v4().to_string(),
            document_id: document.identifier().to_string(),
            credential_type: KEYLESS_CREDENTIAL.to_string(),
            domain: domain.to_string(),
            replacement_for: replacement_for.map(str::to_string),
            binding: None,
            state: CredentialState::Pending,
            usage_count: 0,
        };
        let mut created =
            inner.persist_new(document.identifier(), domain, vec![credential], replacement_for)?;
        drop(inner);
        Ok(created.remove(0))
    }

    /// Attaches issuer data, moving the credential from Pending to Certified.
    ///
    /// The transition is a compare-and-set on the persisted record under the
    /// store lock, so of several concurrent calls exactly one succeeds. There
    /// is no suspension point: the credential is either certified or left
    /// Pending.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::InvalidProof`] if `valid_from` is after `valid_until`.
    /// - [`DocumentError::InvalidTransition`] if the credential is already
    ///   certified or no longer exists.
    pub fn certify(&self, credential: &Credential, proof: IssuerProof) -> DocumentResult<Credential> {
        if proof.valid_from > proof.valid_until {
            return Err(DocumentError::InvalidProof(format!(
                "valid_from {} is after valid_until {}",
                proof.valid_from, proof.valid_until
            )));
        }
        self.lock_inner()?.certify(&credential.identifier, proof)
    }

    /// Returns the persisted credential, or `None`.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be read or its type is unknown.
    pub fn lookup_credential(&self, identifier: &str) -> DocumentResult<Option<Credential>> {
        self.lock_inner()?.read_credential(identifier)
    }

    /// Attestation of the credential's key, from its secure area.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NoSecureAreaBinding`] for keyless credentials,
    /// [`DocumentError::UnknownSecureArea`] if the backend is no longer
    /// registered, or the backend's error.
    pub async fn get_attestation(&self, credential: &Credential) -> DocumentResult<Attestation> {
        let binding = credential
            .binding
            .as_ref()
            .ok_or_else(|| DocumentError::NoSecureAreaBinding(credential.identifier.clone()))?;
        let area = self.secure_area(&binding.secure_area_id)?;
        Ok(area.get_attestation(&binding.alias).await?)
    }

    /// Removes the credential from its document and deletes its key.
    ///
    /// Deleting a credential that no longer exists is not an error.
    ///
    /// # Errors
    ///
    /// Fails if the storage fails.
    pub async fn delete_credential(&self, credential: &Credential) -> DocumentResult<()> {
        self.lock_inner()?.delete_credential(credential)?;
        self.delete_key_best_effort(credential).await;
        Ok(())
    }

    /// Records one more use of the credential.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::CredentialNotFound`] if it was deleted.
    pub fn increment_usage_count(&self, credential: &Credential) -> DocumentResult<Credential> {
        self.lock_inner()?.increment_usage_count(&credential.identifier)
    }

    /// Picks the certified credential of `domain` valid at `now` with the
    /// lowest usage count. Ties go to the oldest credential.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DocumentNotFound`] if the document was deleted.
    pub fn find_credential(
        &self,
        document: &Document,
        domain: &str,
        now: u64,
    ) -> DocumentResult<Option<Credential>> {
        let current = self.lock_inner()?.current(document.identifier())?;
        Ok(current
            .credentials
            .into_iter()
            .filter(|credential| credential.domain == domain && credential.is_valid_at(now))
            .min_by_key(|credential| credential.usage_count))
    }

    /// The credential created as a replacement for `credential`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DocumentNotFound`] if the document was deleted.
    pub fn replacement_of(&self, credential: &Credential) -> DocumentResult<Option<Credential>> {
        let current = self.lock_inner()?.current(&credential.document_id)?;
        Ok(current.credentials.into_iter().find(|candidate| {
            candidate.replacement_for.as_deref() == Some(credential.identifier.as_str())
        }))
    }
}

/// Implementation details, never holding the lock across an await.
impl DocumentStore {
    fn lock_inner(&self) -> DocumentResult<MutexGuard<'_, StoreInner>> {
        self.inner.lock().map_err(|_| {
            DocumentError::Storage(StorageError::Lock(
                "document store mutex poisoned".to_string(),
            ))
        })
    }

    fn secure_area(&self, identifier: &str) -> DocumentResult<Arc<dyn SecureArea>> {
        self.repository
            .lookup(identifier)
            .ok_or_else(|| DocumentError::UnknownSecureArea(identifier.to_string()))
    }

    async fn delete_key_best_effort(&self, credential: &Credential) {
        let Some(binding) = &credential.binding else {
            return;
        };
        match self.repository.lookup(&binding.secure_area_id) {
            Some(area) => discard_key(area.as_ref(), &binding.alias).await,
            None => log::warn!(
                "cannot delete key {} of credential {}: secure area {} is not registered",
                binding.alias,
                credential.identifier,
                binding.secure_area_id
            ),
        }
    }
}

impl StoreInner {
    fn create_document(&mut self) -> DocumentResult<Document> {
        let identifier = Uuid::new_v4().to_string();
        let metadata = (self.metadata_factory)(&identifier, None)?;
        self.write_document(
            &identifier,
            CachedDocument {
                metadata: Arc::clone(&metadata),
                credential_ids: Vec::new(),
            },
        )?;
        log::info!("created document {identifier}");
        Ok(Document {
            identifier,
            metadata,
            credentials: Vec::new(),
        })
    }

    fn save_metadata(&mut self, document: &Document) -> DocumentResult<()> {
        let mut cached = self
            .cached(document.identifier())?
            .ok_or_else(|| DocumentError::DocumentNotFound(document.identifier().to_string()))?;
        cached.metadata = Arc::clone(document.metadata());
        self.write_document(document.identifier(), cached)?;
        log::debug!("saved metadata of document {}", document.identifier());
        Ok(())
    }

    fn delete_document(&mut self, identifier: &str) -> DocumentResult<Vec<Credential>> {
        let document = self
            .snapshot(identifier)?
            .ok_or_else(|| DocumentError::DocumentNotFound(identifier.to_string()))?;
        self.storage.delete(DOCUMENT_NAMESPACE, identifier)?;
        self.documents.remove(identifier);
        // The document no longer references these records, so a failed delete
        // only leaves an unreachable record behind.
        for credential in &document.credentials {
            if let Err(err) = self
                .storage
                .delete(CREDENTIAL_NAMESPACE, &credential.identifier)
            {
                log::warn!(
                    "failed to delete record of credential {} of document {identifier}: {err}",
                    credential.identifier
                );
            }
        }
        log::info!("deleted document {identifier}");
        Ok(document.credentials)
    }

    fn check_creatable(
        &mut self,
        credential_type: &str,
        document_id: &str,
        domain: &str,
        replacement_for: Option<&str>,
    ) -> DocumentResult<()> {
        if !self.loader.is_registered(credential_type) {
            return Err(DocumentError::UnknownCredentialType(
                credential_type.to_string(),
            ));
        }
        self.check_replacement(document_id, domain, replacement_for)
    }

    fn check_replacement(
        &mut self,
        document_id: &str,
        domain: &str,
        replacement_for: Option<&str>,
    ) -> DocumentResult<()> {
        let cached = self
            .cached(document_id)?
            .ok_or_else(|| DocumentError::DocumentNotFound(document_id.to_string()))?;
        let Some(replaced) = replacement_for else {
            return Ok(());
        };
        if !cached.credential_ids.iter().any(|id| id == replaced) {
            return Err(DocumentError::InvalidReplacement(format!(
                "credential {replaced} does not belong to document {document_id}"
            )));
        }
        let replaced_domain = self
            .read_credential(replaced)?
            .map(|credential| credential.domain)
            .ok_or_else(|| {
                DocumentError::InvalidReplacement(format!("credential {replaced} is gone"))
            })?;
        if replaced_domain != domain {
            return Err(DocumentError::InvalidReplacement(format!(
                "credential {replaced} is in domain {replaced_domain}, not {domain}"
            )));
        }
        Ok(())
    }

    /// Validates and persists new Pending credentials, then appends them to
    /// the document. Rolls the credential records back if the document record
    /// cannot be written.
    fn persist_new(
        &mut self,
        document_id: &str,
        domain: &str,
        credentials: Vec<Credential>,
        replacement_for: Option<&str>,
    ) -> DocumentResult<Vec<Credential>> {
        let credentials = credentials
            .into_iter()
            .map(|credential| self.loader.load(credential))
            .collect::<DocumentResult<Vec<_>>>()?;

        // The document may have changed while the keys were being created.
        self.check_replacement(document_id, domain, replacement_for)?;
        let mut cached = self
            .cached(document_id)?
            .ok_or_else(|| DocumentError::DocumentNotFound(document_id.to_string()))?;

        let mut written = Vec::with_capacity(credentials.len());
        let mut result = Ok(());
        for credential in &credentials {
            result = self.write_credential(credential);
            if result.is_err() {
                break;
            }
            written.push(credential.identifier.as_str());
        }
        if result.is_ok() {
            cached
                .credential_ids
                .extend(credentials.iter().map(|c| c.identifier.clone()));
            result = self.write_document(document_id, cached);
        }
        if let Err(err) = result {
            for identifier in written {
                if let Err(cleanup) = self.storage.delete(CREDENTIAL_NAMESPACE, identifier) {
                    log::warn!("failed to roll back credential {identifier}: {cleanup}");
                }
            }
            return Err(err);
        }

        for credential in &credentials {
            log::info!(
                "created pending credential {} in document {document_id}",
                credential.identifier
            );
        }
        Ok(credentials)
    }

    fn certify(&self, identifier: &str, proof: IssuerProof) -> DocumentResult<Credential> {
        let Some(mut current) = self.read_credential(identifier)? else {
            return Err(DocumentError::InvalidTransition {
                credential_id: identifier.to_string(),
                from: "Missing".to_string(),
                to: CredentialStatus::Certified.to_string(),
            });
        };
        if !current.is_certifiable() {
            return Err(DocumentError::InvalidTransition {
                credential_id: identifier.to_string(),
                from: current.state.status().to_string(),
                to: CredentialStatus::Certified.to_string(),
            });
        }
        current.state = CredentialState::Certified(proof);
        self.write_credential(&current)?;
        log::info!("certified credential {identifier}");
        Ok(current)
    }

    fn delete_credential(&mut self, credential: &Credential) -> DocumentResult<()> {
        if let Some(mut cached) = self.cached(&credential.document_id)? {
            cached
                .credential_ids
                .retain(|identifier| identifier != &credential.identifier);
            self.write_document(&credential.document_id, cached)?;
        }
        self.storage
            .delete(CREDENTIAL_NAMESPACE, &credential.identifier)?;
        log::debug!("deleted credential {}", credential.identifier);
        Ok(())
    }

    fn increment_usage_count(&self, identifier: &str) -> DocumentResult<Credential> {
        let mut current = self
            .read_credential(identifier)?
            .ok_or_else(|| DocumentError::CredentialNotFound(identifier.to_string()))?;
        current.usage_count = current.usage_count.saturating_add(1);
        self.write_credential(&current)?;
        Ok(current)
    }

    fn current(&mut self, identifier: &str) -> DocumentResult<Document> {
        self.snapshot(identifier)?
            .ok_or_else(|| DocumentError::DocumentNotFound(identifier.to_string()))
    }

    fn snapshot(&mut self, identifier: &str) -> DocumentResult<Option<Document>> {
        let Some(cached) = self.cached(identifier)? else {
            return Ok(None);
        };
        let credentials = cached
            .credential_ids
            .iter()
            .map(|credential_id| {
                self.read_credential(credential_id)?.ok_or_else(|| {
                    DocumentError::CorruptedRecord(format!(
                        "document {identifier} references missing credential {credential_id}"
                    ))
                })
            })
            .collect::<DocumentResult<Vec<_>>>()?;
        Ok(Some(Document {
            identifier: identifier.to_string(),
            metadata: cached.metadata,
            credentials,
        }))
    }

    fn cached(&mut self, identifier: &str) -> DocumentResult<Option<CachedDocument>> {
        if let Some(cached) = self.documents.get(identifier) {
            return Ok(Some(cached.clone()));
        }
        let Some(bytes) = self.read(DOCUMENT_NAMESPACE, identifier)? else {
            return Ok(None);
        };
        let record = DocumentRecord::deserialize(&bytes)?;
        if record.identifier != identifier {
            return Err(DocumentError::CorruptedRecord(format!(
                "document record {identifier} names {}",
                record.identifier
            )));
        }
        let metadata = (self.metadata_factory)(identifier, Some(record.metadata.as_slice()))?;
        let cached = CachedDocument {
            metadata,
            credential_ids: record.credential_ids,
        };
        self.documents
            .insert(identifier.to_string(), cached.clone());
        log::debug!("loaded document {identifier} from storage");
        Ok(Some(cached))
    }

    /// Reads a record. An identifier the storage cannot address names no record.
    fn read(&self, namespace: &str, identifier: &str) -> DocumentResult<Option<Vec<u8>>> {
        match self.storage.get(namespace, identifier) {
            Err(StorageError::InvalidKey(reason)) => {
                log::debug!("no {namespace} record for {identifier:?}: {reason}");
                Ok(None)
            }
            other => Ok(other?),
        }
    }

    fn write_document(&mut self, identifier: &str, cached: CachedDocument) -> DocumentResult<()> {
        let record = DocumentRecord::new(
            identifier.to_string(),
            cached.metadata.to_bytes()?,
            cached.credential_ids.clone(),
        );
        self.storage
            .put(DOCUMENT_NAMESPACE, identifier, &record.serialize()?)?;
        self.documents.insert(identifier.to_string(), cached);
        Ok(())
    }

    fn read_credential(&self, identifier: &str) -> DocumentResult<Option<Credential>> {
        let Some(bytes) = self.read(CREDENTIAL_NAMESPACE, identifier)? else {
            return Ok(None);
        };
        let record = CredentialRecord::deserialize(&bytes)?;
        self.loader.load(record.credential).map(Some)
    }

    fn write_credential(&self, credential: &Credential) -> DocumentResult<()> {
        let record = CredentialRecord::new(credential.clone());
        self.storage.put(
            CREDENTIAL_NAMESPACE,
            &credential.identifier,
            &record.serialize()?,
        )?;
        Ok(())
    }
}

fn bound_credential(
    document_id: &str,
    credential_type: &str,
    domain: &str,
    secure_area_id: &str,
    key_info: KeyInfo,
    replacement_for: Option<&str>,
) -> Credential {
    log::debug!(
        "{secure_area_id}: binding key {} to a new {credential_type} in document {document_id}",
        key_info.alias
    );
    Credential {
        identifier: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        credential_type: credential_type.to_string(),
        domain: domain.to_string(),
        replacement_for: replacement_for.map(str::to_string),
        binding: Some(SecureAreaBinding {
            secure_area_id: secure_area_id.to_string(),
            alias: key_info.alias,
            public_key: key_info.public_key,
        }),
        state: CredentialState::Pending,
        usage_count: 0,
    }
}

async fn discard_key(area: &dyn SecureArea, alias: &str) {
    if let Err(err) = area.delete_key(alias).await {
        log::warn!("{}: failed to delete key {alias}: {err}", area.identifier());
    }
}

fn verify_batch(
    key_infos: &[KeyInfo],
    key_attestation: Option<&BatchKeyAttestation>,
    settings: &CreateKeySettings,
) -> Result<(), SecureAreaError> {
    let Some(key_attestation) = key_attestation else {
        return key_infos.iter().try_for_each(|info| {
            info.attestation
                .as_ref()
                .ok_or(SecureAreaError::AttestationMismatch)?
                .verify_challenge(&settings.attestation_challenge)
        });
    };
    let body = key_attestation.verify()?;
    if body.nonce != settings.key_attestation_nonce {
        return Err(SecureAreaError::AttestationMismatch);
    }
    let attested = body
        .attested_keys
        .iter()
        .map(JsonWebKey::to_public_key)
        .collect::<Result<Vec<_>, _>>()?;
    let created: Vec<_> = key_infos.iter().map(|info| info.public_key.clone()).collect();
    if attested != created {
        return Err(SecureAreaError::InvalidAttestation(
            "aggregate attestation does not cover the created keys".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SimpleDocumentMetadata;
    use crate::secure_area::SoftwareSecureArea;
    use crate::storage::{MemoryStorage, StorageResult};

    const DOMAIN: &str = "domain";

    fn store() -> DocumentStore {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let repository = SecureAreaRepository::new();
        repository.add(Arc::new(SoftwareSecureArea::new(Arc::clone(&storage))));
        DocumentStore::new(
            storage,
            repository,
            CredentialLoader::with_builtin_types(),
            SimpleDocumentMetadata::factory(),
        )
    }

    async fn pending(store: &DocumentStore, document: &Document) -> Credential {
        store
            .create_credential(
                document,
                DOMAIN,
                "SoftwareSecureArea",
                &CreateKeySettings::new(vec![20, 21, 22]),
                None,
            )
            .await
            .expect("create credential")
    }

    #[tokio::test]
    async fn test_create_credential_appends_pending() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = pending(&store, &document).await;
        assert!(!credential.is_certified());
        assert!(credential.has_secure_area_binding());
        assert_eq!(credential.document_id, document.identifier());

        let reloaded = store
            .lookup_document(document.identifier())
            .expect("lookup")
            .expect("present");
        assert_eq!(reloaded.credentials(), &[credential]);
        assert!(Arc::ptr_eq(reloaded.metadata(), document.metadata()));
    }

    #[tokio::test]
    async fn test_unknown_secure_area_persists_nothing() {
        let store = store();
        let document = store.create_document().expect("document");
        match store
            .create_credential(&document, DOMAIN, "Nope", &CreateKeySettings::new(Vec::new()), None)
            .await
        {
            Err(DocumentError::UnknownSecureArea(id)) => assert_eq!(id, "Nope"),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        let reloaded = store
            .lookup_document(document.identifier())
            .expect("lookup")
            .expect("present");
        assert!(reloaded.credentials().is_empty());
    }

    #[tokio::test]
    async fn test_certify_once() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = pending(&store, &document).await;
        let certified = store
            .certify(&credential, IssuerProof::new(vec![1], 0, 100))
            .expect("certify");
        assert!(certified.is_certified());

        match store.certify(&credential, IssuerProof::new(vec![2], 0, 100)) {
            Err(DocumentError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, "Certified");
                assert_eq!(to, "Certified");
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        let stored = store
            .lookup_credential(&credential.identifier)
            .expect("lookup")
            .expect("present");
        assert_eq!(stored.issuer_proof().map(|p| p.issuer_data.clone()), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_certify_rejects_inverted_proof() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = pending(&store, &document).await;
        assert!(matches!(
            store.certify(&credential, IssuerProof::new(Vec::new(), 10, 5)),
            Err(DocumentError::InvalidProof(_))
        ));
    }

    #[tokio::test]
    async fn test_certify_deleted_credential() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = pending(&store, &document).await;
        store.delete_credential(&credential).await.expect("delete");
        assert!(matches!(
            store.certify(&credential, IssuerProof::new(Vec::new(), 0, 1)),
            Err(DocumentError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_credential_prefers_least_used() {
        let store = store();
        let document = store.create_document().expect("document");
        let first = pending(&store, &document).await;
        let second = pending(&store, &document).await;
        let _never_certified = pending(&store, &document).await;
        store
            .certify(&first, IssuerProof::new(Vec::new(), 0, 100))
            .expect("certify");
        store
            .certify(&second, IssuerProof::new(Vec::new(), 0, 100))
            .expect("certify");

        let found = store
            .find_credential(&document, DOMAIN, 50)
            .expect("find")
            .expect("some");
        assert_eq!(found.identifier, first.identifier);

        store.increment_usage_count(&first).expect("use");
        let found = store
            .find_credential(&document, DOMAIN, 50)
            .expect("find")
            .expect("some");
        assert_eq!(found.identifier, second.identifier);

        assert!(store
            .find_credential(&document, DOMAIN, 101)
            .expect("find")
            .is_none());
        assert!(store
            .find_credential(&document, "other", 50)
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn test_replacement_must_share_domain() {
        let store = store();
        let document = store.create_document().expect("document");
        let old = pending(&store, &document).await;
        let settings = CreateKeySettings::new(Vec::new());

        assert!(matches!(
            store
                .create_credential(
                    &document,
                    "elsewhere",
                    "SoftwareSecureArea",
                    &settings,
                    Some(old.identifier.as_str()),
                )
                .await,
            Err(DocumentError::InvalidReplacement(_))
        ));

        let new = store
            .create_credential(
                &document,
                DOMAIN,
                "SoftwareSecureArea",
                &settings,
                Some(old.identifier.as_str()),
            )
            .await
            .expect("replacement");
        assert_eq!(
            store.replacement_of(&old).expect("replacement_of"),
            Some(new)
        );
    }

    #[tokio::test]
    async fn test_keyless_credential_has_no_attestation() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = store
            .create_keyless_credential(&document, DOMAIN, None)
            .expect("keyless");
        assert!(!credential.has_secure_area_binding());
        match store.get_attestation(&credential).await {
            Err(DocumentError::NoSecureAreaBinding(id)) => assert_eq!(id, credential.identifier),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_type_is_rejected() {
        let store = store();
        let document = store.create_document().expect("document");
        assert!(matches!(
            store
                .create_credential_of_type(
                    &document,
                    "Custom",
                    DOMAIN,
                    "SoftwareSecureArea",
                    &CreateKeySettings::new(Vec::new()),
                    None,
                )
                .await,
            Err(DocumentError::UnknownCredentialType(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_document_removes_keys() {
        let store = store();
        let document = store.create_document().expect("document");
        let credential = pending(&store, &document).await;
        let alias = credential.binding.clone().expect("binding").alias;

        store
            .delete_document(document.identifier())
            .await
            .expect("delete");
        assert!(store
            .lookup_document(document.identifier())
            .expect("lookup")
            .is_none());
        assert!(store
            .lookup_credential(&credential.identifier)
            .expect("lookup")
            .is_none());
        let area = store
            .secure_area_repository()
            .lookup("SoftwareSecureArea")
            .expect("area");
        assert!(matches!(
            area.key_info(&alias).await,
            Err(SecureAreaError::KeyNotFound(_))
        ));
        assert!(matches!(
            store.delete_document(document.identifier()).await,
            Err(DocumentError::DocumentNotFound(_))
        ));
    }

    /// Storage whose delete of one credential record always fails.
    struct StuckRecordStorage {
        inner: MemoryStorage,
        stuck: Mutex<Option<String>>,
    }

    impl Storage for StuckRecordStorage {
        fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(namespace, key)
        }

        fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
            self.inner.put(namespace, key, value)
        }

        fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
            let stuck = self.stuck.lock().expect("lock");
            if namespace == CREDENTIAL_NAMESPACE && stuck.as_deref() == Some(key) {
                return Err(StorageError::io(
                    format!("deleting {key}"),
                    std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                ));
            }
            drop(stuck);
            self.inner.delete(namespace, key)
        }

        fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
            self.inner.keys(namespace)
        }
    }

    #[tokio::test]
    async fn test_delete_document_continues_past_failed_record_delete() {
        let storage = Arc::new(StuckRecordStorage {
            inner: MemoryStorage::new(),
            stuck: Mutex::new(None),
        });
        let shared: Arc<dyn Storage> = Arc::clone(&storage) as Arc<dyn Storage>;
        let repository = SecureAreaRepository::new();
        repository.add(Arc::new(SoftwareSecureArea::new(Arc::clone(&shared))));
        let store = DocumentStore::new(
            shared,
            repository,
            CredentialLoader::with_builtin_types(),
            SimpleDocumentMetadata::factory(),
        );
        let document = store.create_document().expect("document");
        let first = pending(&store, &document).await;
        let second = pending(&store, &document).await;
        *storage.stuck.lock().expect("lock") = Some(first.identifier.clone());

        store
            .delete_document(document.identifier())
            .await
            .expect("delete");
        assert!(store
            .lookup_document(document.identifier())
            .expect("lookup")
            .is_none());
        assert!(store
            .lookup_credential(&second.identifier)
            .expect("lookup")
            .is_none());
        assert_eq!(
            storage.keys("SoftwareSecureArea").expect("keys"),
            Vec::<String>::new()
        );
    }

    #[tokio::test]
    async fn test_save_metadata() {
        let store = store();
        let document = store.create_document().expect("document");
        let simple = document
            .metadata()
            .as_any()
            .downcast_ref::<SimpleDocumentMetadata>()
            .expect("simple");
        simple.set_display_name(Some("Test".to_string()));
        store.save_metadata(&document).expect("save");
        assert_eq!(
            store.list_documents().expect("list"),
            vec![document.identifier().to_string()]
        );
    }
}
