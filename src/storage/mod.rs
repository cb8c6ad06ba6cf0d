//! Persisted key-value state
//!
//! The background process persists a small set of JSON values: the password
//! verification artifact, the serialized vault list, the selected vault id,
//! and migration progress flags. Everything goes through the [`KvStore`]
//! trait so tests can run fully in memory.

use crate::errors::{Result, WalletError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Abstract persisted key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Apply several mutations in one durable commit. A `None` value removes
    /// the key. Used where multi-key consistency matters (password change).
    fn set_batch(&self, entries: Vec<(String, Option<Value>)>) -> Result<()>;
}

/// JSON-file backed store. The whole document is rewritten on every mutation
/// via write-to-temp-then-rename, so a batch commit is crash-atomic.
pub struct FileKvStore {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, Value>>,
}

impl FileKvStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let cache = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn persist(&self, cache: &BTreeMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(cache)?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| WalletError::StorageError("store path has no parent".to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| WalletError::StorageError(e.to_string()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| WalletError::StorageError(e.to_string()))?;

        debug!("Persisted {} keys to {:?}", cache.len(), self.path);
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), value);
        self.persist(&cache)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.write().unwrap();
        cache.remove(key);
        self.persist(&cache)
    }

    fn set_batch(&self, entries: Vec<(String, Option<Value>)>) -> Result<()> {
        let mut cache = self.cache.write().unwrap();
        for (key, value) in entries {
            match value {
                Some(v) => {
                    cache.insert(key, v);
                }
                None => {
                    cache.remove(&key);
                }
            }
        }
        self.persist(&cache)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryKvStore {
    cache: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.cache.write().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.cache.write().unwrap().remove(key);
        Ok(())
    }

    fn set_batch(&self, entries: Vec<(String, Option<Value>)>) -> Result<()> {
        let mut cache = self.cache.write().unwrap();
        for (key, value) in entries {
            match value {
                Some(v) => {
                    cache.insert(key, v);
                }
                None => {
                    cache.remove(&key);
                }
            }
        }
        Ok(())
    }
}
