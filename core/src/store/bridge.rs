// Bridged message store
//
// On desktop builds conversation logs live in plain files owned by the
// host process, one directory per account. The host side implements
// HostStoreBridge; BridgedStore adapts it to the same contract the other
// backends answer.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::StoreError;

// ============================================================================
// HOST BRIDGE TRAIT
// ============================================================================

/// Host-side file store abstraction.
///
/// Implementers back each `(directory, key)` pair with one file. A missing
/// key yields an empty payload, not an error; `keys` lists whatever the
/// directory currently holds, in no particular order.
#[async_trait]
pub trait HostStoreBridge: Send + Sync {
    /// Root directory the host persists application data under
    async fn data_path(&self) -> Result<String, StoreError>;

    /// Read the payload stored under `key`, empty when absent
    async fn get(&self, directory: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `value` under `key`
    async fn set(&self, directory: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete `key`; absent keys are fine
    async fn remove(&self, directory: &str, key: &str) -> Result<(), StoreError>;

    /// Delete every key under `directory`
    async fn clear(&self, directory: &str) -> Result<(), StoreError>;

    /// All keys currently stored under `directory`
    async fn keys(&self, directory: &str) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// BRIDGED ADAPTER
// ============================================================================

/// Backend adapter over a `HostStoreBridge`.
///
/// Keys are scoped to `{data_path}/messages/{account}/`. That directory is
/// resolved exactly once: `init()` resolves it up front, and any operation
/// that arrives earlier resolves it on first use instead of failing.
pub struct BridgedStore {
    bridge: Arc<dyn HostStoreBridge>,
    account: String,
    directory: OnceCell<String>,
}

impl BridgedStore {
    pub fn new(bridge: Arc<dyn HostStoreBridge>, account: &str) -> Self {
        Self {
            bridge,
            account: account.to_string(),
            directory: OnceCell::new(),
        }
    }

    /// Resolve the per-account directory up front
    pub async fn init(&self) -> Result<(), StoreError> {
        self.directory().await?;
        Ok(())
    }

    async fn directory(&self) -> Result<&str, StoreError> {
        let dir = self
            .directory
            .get_or_try_init(|| async {
                let base = self.bridge.data_path().await?;
                let dir = format!("{}/messages/{}/", base, self.account);
                debug!("Bridged message store ready at {}", dir);
                Ok::<_, StoreError>(dir)
            })
            .await?;
        Ok(dir.as_str())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let directory = self.directory().await?;
        let payload = self.bridge.get(directory, key).await?;
        // the host answers an empty payload for keys it has no file for
        Ok(if payload.is_empty() { None } else { Some(payload) })
    }

    pub async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let directory = self.directory().await?;
        self.bridge.set(directory, key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let directory = self.directory().await?;
        self.bridge.remove(directory, key).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let directory = self.directory().await?;
        self.bridge.clear(directory).await
    }

    /// Stored keys, sorted so enumeration matches the indexed backends
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let directory = self.directory().await?;
        let mut keys = self.bridge.keys(directory).await?;
        keys.sort();
        Ok(keys)
    }

    pub async fn iterate<T, F>(&self, mut visit: F) -> Result<Option<T>, StoreError>
    where
        F: FnMut(&[u8], &str, usize) -> ControlFlow<T>,
    {
        let mut ordinal = 0;
        for key in self.keys().await? {
            let value = match self.get(&key).await? {
                Some(value) => value,
                // vanished between listing and read
                None => continue,
            };
            ordinal += 1;
            if let ControlFlow::Break(found) = visit(&value, &key, ordinal) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// MOCK HOST BRIDGE (for testing)
// ============================================================================

/// In-memory stand-in for the host process
#[cfg(test)]
pub struct MockHostBridge {
    base: String,
    files: parking_lot::RwLock<std::collections::HashMap<(String, String), Vec<u8>>>,
    data_path_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockHostBridge {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            files: parking_lot::RwLock::new(std::collections::HashMap::new()),
            data_path_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn data_path_calls(&self) -> usize {
        self.data_path_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn directories(&self) -> Vec<String> {
        let mut dirs: Vec<String> = self
            .files
            .read()
            .keys()
            .map(|(dir, _)| dir.clone())
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

#[cfg(test)]
#[async_trait]
impl HostStoreBridge for MockHostBridge {
    async fn data_path(&self) -> Result<String, StoreError> {
        self.data_path_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.base.clone())
    }

    async fn get(&self, directory: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(self
            .files
            .read()
            .get(&(directory.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set(&self, directory: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.files
            .write()
            .insert((directory.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    async fn remove(&self, directory: &str, key: &str) -> Result<(), StoreError> {
        self.files
            .write()
            .remove(&(directory.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, directory: &str) -> Result<(), StoreError> {
        self.files.write().retain(|(dir, _), _| dir != directory);
        Ok(())
    }

    async fn keys(&self, directory: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|(dir, _)| dir == directory)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store(base: &str) -> (Arc<MockHostBridge>, BridgedStore) {
        let bridge = Arc::new(MockHostBridge::new(base));
        let store = BridgedStore::new(bridge.clone(), "alice@example.com");
        (bridge, store)
    }

    #[tokio::test]
    async fn test_init_resolves_account_directory() {
        let (bridge, store) = make_store("/data/app");
        store.init().await.unwrap();
        store.set("bob@x", b"log").await.unwrap();

        assert_eq!(bridge.data_path_calls(), 1);
        assert_eq!(
            bridge.directories(),
            vec!["/data/app/messages/alice@example.com/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_lazy_resolution_on_first_use() {
        let (bridge, store) = make_store("/data/app");

        // no init() call; first operation resolves the directory
        assert_eq!(store.get("bob@x").await.unwrap(), None);
        store.set("bob@x", b"log").await.unwrap();
        store.keys().await.unwrap();

        assert_eq!(bridge.data_path_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_means_missing() {
        let (_bridge, store) = make_store("/data/app");
        store.init().await.unwrap();

        assert_eq!(store.get("never-set").await.unwrap(), None);

        store.set("bob@x", b"").await.unwrap();
        assert_eq!(store.get("bob@x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let (_bridge, store) = make_store("/data/app");
        store.set("carol@x", b"3").await.unwrap();
        store.set("bob@x", b"2").await.unwrap();

        assert_eq!(
            store.keys().await.unwrap(),
            vec!["bob@x".to_string(), "carol@x".to_string()]
        );
    }

    #[tokio::test]
    async fn test_iterate_short_circuits() {
        let (_bridge, store) = make_store("/data/app");
        store.set("a@x", b"1").await.unwrap();
        store.set("b@x", b"2").await.unwrap();
        store.set("c@x", b"3").await.unwrap();

        let mut visits = 0;
        let found = store
            .iterate(|value, key, ordinal| {
                visits += 1;
                if value == b"2" {
                    ControlFlow::Break((key.to_string(), ordinal))
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert_eq!(found, Some(("b@x".to_string(), 2)));
        assert_eq!(visits, 2);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (_bridge, store) = make_store("/data/app");
        store.set("a@x", b"1").await.unwrap();
        store.set("b@x", b"2").await.unwrap();

        store.remove("a@x").await.unwrap();
        assert_eq!(store.get("a@x").await.unwrap(), None);
        assert_eq!(store.keys().await.unwrap(), vec!["b@x".to_string()]);

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }
}
