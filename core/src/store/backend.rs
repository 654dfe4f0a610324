// Storage backends for conversation logs
//
// One enum, three homes for the same data:
// - Direct: embedded sled database, one per account
// - Bridged: per-account file store owned by the host process
// - Memory: volatile, for tests
//
// All variants answer the same contract: get() is None for a missing key,
// keys() is None for an empty store, set() echoes the stored bytes, and
// iterate() walks entries in key order until the visitor breaks.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::bridge::BridgedStore;
use crate::StoreError;

/// Volatile key/value store for tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.write().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn iterate<T, F>(&self, mut visit: F) -> Option<T>
    where
        F: FnMut(&[u8], &str, usize) -> ControlFlow<T>,
    {
        for (ordinal, (key, value)) in self.entries.read().iter().enumerate() {
            if let ControlFlow::Break(found) = visit(value, key, ordinal + 1) {
                return Some(found);
            }
        }
        None
    }
}

/// Embedded indexed store, one database per account
pub struct DirectStore {
    db: sled::Db,
}

impl DirectStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Storage(e.to_string()))?;
        debug!("Opened message store at {}", path.display());
        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.db
            .clear()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in self.db.iter() {
            let (key, _) = entry.map_err(|e| StoreError::Storage(e.to_string()))?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    pub fn iterate<T, F>(&self, mut visit: F) -> Result<Option<T>, StoreError>
    where
        F: FnMut(&[u8], &str, usize) -> ControlFlow<T>,
    {
        for (ordinal, entry) in self.db.iter().enumerate() {
            let (key, value) = entry.map_err(|e| StoreError::Storage(e.to_string()))?;
            let key = String::from_utf8_lossy(&key);
            if let ControlFlow::Break(found) = visit(&value, &key, ordinal + 1) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

}

/// A conversation-log store, picked at initialize time.
///
/// Explicit variants instead of a trait object, so call sites dispatch on
/// the tag and the bridged variant keeps its async surface.
pub enum StoreBackend {
    Memory(MemoryStore),
    Direct(DirectStore),
    Bridged(BridgedStore),
}

impl StoreBackend {
    /// Volatile store for tests
    pub fn memory() -> Self {
        StoreBackend::Memory(MemoryStore::new())
    }

    /// Embedded store at `path`
    pub fn direct(path: &Path) -> Result<Self, StoreError> {
        Ok(StoreBackend::Direct(DirectStore::open(path)?))
    }

    /// Fetch the value under `key`, `None` when absent
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.get(key)),
            StoreBackend::Direct(store) => store.get(key),
            StoreBackend::Bridged(store) => store.get(key).await,
        }
    }

    /// Store `value` under `key`, echoing the stored bytes back
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        match self {
            StoreBackend::Memory(store) => store.set(key, value.clone()),
            StoreBackend::Direct(store) => store.set(key, &value)?,
            StoreBackend::Bridged(store) => store.set(key, &value).await?,
        }
        Ok(value)
    }

    /// Delete `key`; deleting an absent key is not an error
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.remove(key);
                Ok(())
            }
            StoreBackend::Direct(store) => store.remove(key),
            StoreBackend::Bridged(store) => store.remove(key).await,
        }
    }

    /// Drop every key in the store
    pub async fn clear(&self) -> Result<(), StoreError> {
        debug!("Clearing message store");
        match self {
            StoreBackend::Memory(store) => {
                store.clear();
                Ok(())
            }
            StoreBackend::Direct(store) => store.clear(),
            StoreBackend::Bridged(store) => store.clear().await,
        }
    }

    /// All stored keys in key order, `None` when the store is empty
    pub async fn keys(&self) -> Result<Option<Vec<String>>, StoreError> {
        let keys = match self {
            StoreBackend::Memory(store) => store.keys(),
            StoreBackend::Direct(store) => store.keys()?,
            StoreBackend::Bridged(store) => store.keys().await?,
        };
        Ok(if keys.is_empty() { None } else { Some(keys) })
    }

    /// Visit every entry as `(value, key, ordinal)` in key order, with a
    /// 1-based ordinal. Stops at the first `ControlFlow::Break` and returns
    /// its value; a full pass returns `None`.
    pub async fn iterate<T, F>(&self, visit: F) -> Result<Option<T>, StoreError>
    where
        F: FnMut(&[u8], &str, usize) -> ControlFlow<T>,
    {
        match self {
            StoreBackend::Memory(store) => Ok(store.iterate(visit)),
            StoreBackend::Direct(store) => store.iterate(visit),
            StoreBackend::Bridged(store) => store.iterate(visit).await,
        }
    }
}
