//! Common test utilities shared across integration tests.

use std::sync::Arc;

use credkit_core::document::{CredentialLoader, DocumentStore, SimpleDocumentMetadata};
use credkit_core::secure_area::{SecureArea, SecureAreaRepository, SoftwareSecureArea};
use credkit_core::storage::Storage;

/// Builds a store over `storage` with the software backend plus `extra` areas.
pub fn create_test_document_store(
    storage: &Arc<dyn Storage>,
    extra: Vec<Arc<dyn SecureArea>>,
) -> DocumentStore {
    let repository = SecureAreaRepository::new();
    repository.add(Arc::new(SoftwareSecureArea::new(Arc::clone(storage))));
    for area in extra {
        repository.add(area);
    }
    DocumentStore::new(
        Arc::clone(storage),
        repository,
        CredentialLoader::with_builtin_types(),
        SimpleDocumentMetadata::factory(),
    )
}
