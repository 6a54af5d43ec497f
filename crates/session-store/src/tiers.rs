//! Storage tier implementations.

use crate::{StorageError, StorageResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Trait for a session storage tier.
///
/// A tier is a flat key/value namespace. The lifetime of the data is the
/// tier's defining property: [`MemoryTier`] dies with the process while
/// [`FileTier`] outlives it and is shared across contexts.
pub trait SessionTier: Send + Sync {
    /// Store a value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether a value existed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists.
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Process-scoped in-memory tier (the ephemeral tier).
pub struct MemoryTier {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTier for MemoryTier {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.lock().unwrap();
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.lock().unwrap();
        Ok(data.remove(key).is_some())
    }
}

/// File-backed tier (the durable, cross-context tier).
///
/// Each key is one JSON file under the tier directory. Writes go through a
/// temp file followed by a rename so a concurrent reader never observes a
/// half-written value.
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    /// Create a file tier rooted at `dir`, creating the directory if needed.
    pub fn new(dir: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionTier for FileTier {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
