//! Persisted forms of documents and credentials.
//!
//! Both are CBOR maps carrying a `version` field. Records with any other
//! version are rejected rather than guessed at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{DocumentError, DocumentResult};
use super::types::Credential;

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub(crate) version: u32,
    pub(crate) identifier: String,
    pub(crate) metadata: Vec<u8>,
    pub(crate) credential_ids: Vec<String>,
}

impl DocumentRecord {
    pub(crate) const fn new(identifier: String, metadata: Vec<u8>, credential_ids: Vec<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            identifier,
            metadata,
            credential_ids,
        }
    }

    pub(crate) fn serialize(&self) -> DocumentResult<Vec<u8>> {
        to_cbor(self)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> DocumentResult<Self> {
        let record: Self = from_cbor(bytes)?;
        check_version(record.version)?;
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub(crate) version: u32,
    pub(crate) credential: Credential,
}

impl CredentialRecord {
    pub(crate) const fn new(credential: Credential) -> Self {
        Self {
            version: RECORD_VERSION,
            credential,
        }
    }

    pub(crate) fn serialize(&self) -> DocumentResult<Vec<u8>> {
        to_cbor(self)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> DocumentResult<Self> {
        let record: Self = from_cbor(bytes)?;
        check_version(record.version)?;
        Ok(record)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> DocumentResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|err| DocumentError::Serialization(err.to_string()))?;
    Ok(bytes)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> DocumentResult<T> {
    ciborium::de::from_reader(bytes).map_err(|err| DocumentError::CorruptedRecord(err.to_string()))
}

const fn check_version(version: u32) -> DocumentResult<()> {
    if version == RECORD_VERSION {
        Ok(())
    } else {
        Err(DocumentError::UnsupportedRecordVersion(version))
    }
}
