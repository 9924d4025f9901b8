use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::error::{StorageError, StorageResult};
use super::Storage;

type Namespaces = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// In-process [`Storage`]. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Namespaces>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> StorageResult<MutexGuard<'_, Namespaces>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Lock("memory storage mutex poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let inner = self.lock_inner()?;
        Ok(inner.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut inner = self.lock_inner()?;
        inner
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        let mut inner = self.lock_inner()?;
        if let Some(ns) = inner.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let inner = self.lock_inner()?;
        Ok(inner
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}
