//! Filesystem-backed [`Storage`].
//!
//! Each namespace is a directory under the root and each key a file inside
//! it. Both names are hex encoded so that arbitrary identifiers map to valid
//! file names on every platform.
//!
//! Writes go to a hidden temporary file in the same directory, are synced,
//! then renamed over the target. Readers therefore see the old or the new
//! content, never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use super::Storage;

const TEMP_SUFFIX: &str = ".tmp";

/// [`Storage`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens storage rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::io(
                format!("failed to create storage root '{}'", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    /// Root directory of this storage.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> StorageResult<PathBuf> {
        if namespace.is_empty() {
            return Err(StorageError::InvalidKey("empty namespace".to_string()));
        }
        Ok(self.root.join(hex::encode(namespace)))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        Ok(self.namespace_dir(namespace)?.join(hex::encode(key)))
    }

    fn sync_directory(dir: &Path) -> StorageResult<()> {
        // Directories cannot be opened for syncing on Windows; the rename is
        // still atomic there.
        if cfg!(unix) {
            File::open(dir)
                .and_then(|d| d.sync_all())
                .map_err(|e| StorageError::io(format!("failed to sync '{}'", dir.display()), e))?;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.entry_path(namespace, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(
                format!("failed to read '{}'", path.display()),
                e,
            )),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        let dir = self.namespace_dir(namespace)?;
        let path = self.entry_path(namespace, key)?;
        let temp = dir.join(format!(".{}{TEMP_SUFFIX}", hex::encode(key)));

        fs::create_dir_all(&dir).map_err(|e| {
            StorageError::io(format!("failed to create '{}'", dir.display()), e)
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .map_err(|e| StorageError::io(format!("failed to create '{}'", temp.display()), e))?;
        file.write_all(value)
            .and_then(|()| file.sync_all())
            .map_err(|e| StorageError::io(format!("failed to write '{}'", temp.display()), e))?;
        drop(file);

        fs::rename(&temp, &path).map_err(|e| {
            StorageError::io(
                format!("failed to rename '{}' to '{}'", temp.display(), path.display()),
                e,
            )
        })?;
        Self::sync_directory(&dir)
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        let path = self.entry_path(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(
                format!("failed to delete '{}'", path.display()),
                e,
            )),
        }
    }

    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let dir = self.namespace_dir(namespace)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::io(
                    format!("failed to list '{}'", dir.display()),
                    e,
                ))
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| StorageError::io(format!("failed to list '{}'", dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Leftovers of interrupted writes.
            if name.starts_with('.') {
                continue;
            }
            let key = hex::decode(name)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    StorageError::InvalidKey(format!("unexpected file '{name}' in storage"))
                })?;
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}
