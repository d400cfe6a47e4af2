/*!
Local filesystem key-value store.
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::KeyValueStore;
use crate::{Result, StoreError};

/// Key-value store keeping one JSON file per key
///
/// Key segments separated by `:` become nested directories, so
/// `snapshots:exec-1` is stored at `<base_dir>/snapshots/exec-1.json`.
/// Writes go through a temporary file in the same directory and are renamed
/// into place, so readers never observe a half-written value.
///
/// # Example
/// ```rust
/// use rewind_core::backend::{FileKeyValueStore, KeyValueStore};
///
/// # let dir = tempfile::TempDir::new()?;
/// let store = FileKeyValueStore::new(dir.path());
/// store.set_item("snapshots:index", "[]")?;
/// assert_eq!(store.get_item("snapshots:index")?.as_deref(), Some("[]"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    base_dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the file path for a key, rejecting segments that would escape
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.base_dir.clone();
        let segments: Vec<&str> = key.split(':').collect();

        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty()
                || *segment == "."
                || *segment == ".."
                || segment.contains('/')
                || segment.contains('\\')
            {
                return Err(StoreError::validation(format!(
                    "Key '{key}' cannot be mapped to a file path"
                )));
            }
            if i + 1 == segments.len() {
                path.push(format!("{segment}.json"));
            } else {
                path.push(segment);
            }
        }
        Ok(path)
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let full_path = self.resolve_path(key)?;

        match fs::read_to_string(&full_path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::storage(format!(
                "Failed to read {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let full_path = self.resolve_path(key)?;
        self.ensure_parent_dir(&full_path)?;

        let parent = full_path.parent().unwrap_or(&self.base_dir);
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&full_path).map_err(|e| {
            StoreError::storage(format!(
                "Failed to write {}: {}",
                full_path.display(),
                e.error
            ))
        })?;

        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_path(key)?;

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::storage(format!(
                "Failed to delete {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}
