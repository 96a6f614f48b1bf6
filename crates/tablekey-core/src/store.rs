//! Session-scoped key/value storage
//!
//! Credential managers never touch a concrete store; they receive an
//! `Arc<dyn KeyValueStore>`. `MemoryStore` is the default session scope,
//! `JsonFileStore` keeps a CLI session in a single JSON file.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Key/value storage backend
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Store several values as one atomic write
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Delete several keys as one atomic write
    fn delete_many(&self, keys: &[&str]) -> Result<()>;

    /// Check if a key exists
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        (**self).set_many(entries)
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        (**self).delete_many(keys)
    }
}

type Entries = BTreeMap<String, String>;

fn lock(data: &Mutex<Entries>) -> Result<MutexGuard<'_, Entries>> {
    data.lock()
        .map_err(|_| Error::Storage("store lock poisoned".to_string()))
}

/// In-memory store living as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored entry
    pub fn snapshot(&self) -> Result<BTreeMap<String, String>> {
        Ok(lock(&self.data)?.clone())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.data)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.data)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.data)?.remove(key).is_some())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut data = lock(&self.data)?;
        for (key, value) in entries {
            data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        let mut data = lock(&self.data)?;
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}

/// Store persisted as a JSON object file
///
/// Every mutation rewrites the whole file while holding the lock, so a
/// multi-key write lands on disk together.
pub struct JsonFileStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory copy of the file
    data: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at the default path (<cache dir>/tablekey/session.json)
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Open a store at a specific path
    ///
    /// Loads existing data from disk if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded session store from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse session store, starting fresh: {}", e);
                    BTreeMap::new()
                }
            }
        } else {
            debug!("No existing session store, creating new");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Get the default storage path
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Config("cache directory not found".to_string()))?;
        Ok(cache_dir.join("tablekey").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved session store to {:?}", self.path);
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.data)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut data = lock(&self.data)?;
        let existed = data.remove(key).is_some();
        if existed {
            self.save(&data)?;
        }
        Ok(existed)
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut data = lock(&self.data)?;
        for (key, value) in entries {
            data.insert(key.to_string(), value.to_string());
        }
        self.save(&data)
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        let mut data = lock(&self.data)?;
        for key in keys {
            data.remove(*key);
        }
        self.save(&data)
    }
}

/// Prefixes every key with `<namespace>:`
pub struct Namespaced<S> {
    inner: S,
    namespace: String,
}

impl<S: KeyValueStore> Namespaced<S> {
    pub fn new(inner: S, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

impl<S: KeyValueStore> KeyValueStore for Namespaced<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(&self.key(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(&self.key(key), value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(&self.key(key))
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let keys: Vec<String> = entries.iter().map(|(k, _)| self.key(k)).collect();
        let prefixed: Vec<(&str, &str)> = keys
            .iter()
            .zip(entries)
            .map(|(k, (_, v))| (k.as_str(), *v))
            .collect();
        self.inner.set_many(&prefixed)
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.inner.delete_many(&refs)
    }
}
