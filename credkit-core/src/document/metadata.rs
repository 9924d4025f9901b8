//! Application metadata attached to documents.
//!
//! The store treats metadata as opaque bytes. A [`DocumentMetadataFactory`]
//! turns those bytes back into a [`DocumentMetadata`] object when a document
//! is created (`None`) or loaded from storage (`Some(bytes)`).

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::error::{DocumentError, DocumentResult};

/// Metadata of a document.
pub trait DocumentMetadata: Send + Sync {
    /// Serializes the metadata for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Serialization`] if encoding fails.
    fn to_bytes(&self) -> DocumentResult<Vec<u8>>;

    /// Downcasting hook for callers that know the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Builds metadata for a document identifier from optional persisted bytes.
pub type DocumentMetadataFactory = Arc<
    dyn Fn(&str, Option<&[u8]>) -> DocumentResult<Arc<dyn DocumentMetadata>> + Send + Sync,
>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SimpleMetadataData {
    display_name: Option<String>,
    type_display_name: Option<String>,
    provisioned: bool,
    application_data: Option<Vec<u8>>,
}

/// General purpose [`DocumentMetadata`].
///
/// Setters take `&self` so that metadata shared through a
/// [`Document`](super::Document) can be edited; persist the change with
/// [`DocumentStore::save_metadata`](super::DocumentStore::save_metadata).
#[derive(Debug, Default)]
pub struct SimpleDocumentMetadata {
    data: RwLock<SimpleMetadataData>,
}

impl SimpleDocumentMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores metadata produced by [`DocumentMetadata::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::CorruptedRecord`] for malformed bytes.
    pub fn from_bytes(bytes: &[u8]) -> DocumentResult<Self> {
        let data: SimpleMetadataData = ciborium::de::from_reader(bytes)
            .map_err(|err| DocumentError::CorruptedRecord(format!("document metadata: {err}")))?;
        Ok(Self {
            data: RwLock::new(data),
        })
    }

    /// Factory producing [`SimpleDocumentMetadata`] for every document.
    #[must_use]
    pub fn factory() -> DocumentMetadataFactory {
        Arc::new(|_identifier: &str, bytes: Option<&[u8]>| {
            let metadata = match bytes {
                Some(bytes) => Self::from_bytes(bytes)?,
                None => Self::new(),
            };
            Ok(Arc::new(metadata) as Arc<dyn DocumentMetadata>)
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SimpleMetadataData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SimpleMetadataData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the document shown to the user.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.read().display_name.clone()
    }

    /// Sets the name shown to the user.
    pub fn set_display_name(&self, display_name: Option<String>) {
        self.write().display_name = display_name;
    }

    /// Name of the document type shown to the user.
    #[must_use]
    pub fn type_display_name(&self) -> Option<String> {
        self.read().type_display_name.clone()
    }

    /// Sets the document type name shown to the user.
    pub fn set_type_display_name(&self, type_display_name: Option<String>) {
        self.write().type_display_name = type_display_name;
    }

    /// Whether the issuer finished provisioning the document.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.read().provisioned
    }

    /// Marks the document as provisioned.
    pub fn set_provisioned(&self, provisioned: bool) {
        self.write().provisioned = provisioned;
    }

    /// Opaque bytes owned by the application.
    #[must_use]
    pub fn application_data(&self) -> Option<Vec<u8>> {
        self.read().application_data.clone()
    }

    /// Replaces the application bytes.
    pub fn set_application_data(&self, data: Option<Vec<u8>>) {
        self.write().application_data = data;
    }
}

impl DocumentMetadata for SimpleDocumentMetadata {
    fn to_bytes(&self) -> DocumentResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&*self.read(), &mut bytes)
            .map_err(|err| DocumentError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
