//! Durable keyed blob storage used by the document store and the software
//! secure area.
//!
//! Values are addressed by `(namespace, key)`. Implementations must make a
//! single `put` atomic: a reader sees either the previous bytes or the new
//! bytes, never a mix.

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Keyed blob store.
pub trait Storage: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()>;

    /// Lists the keys of a namespace in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be enumerated.
    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Whether `key` holds a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn contains(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(namespace, key)?.is_some())
    }
}
