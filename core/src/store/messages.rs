// Message repository - append, revise and page conversation logs
//
// The service facade over backend, queue, index and cursors. Every
// read-modify-write of a log runs as one queued task, so writes never
// interleave whichever conversation they touch. With no active backend
// (before initialize, after close) operations resolve with their empty
// shapes instead of failing.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::message::codec::{
    decode_log, decode_messages, decode_record, encode_log, encode_record, StoredLog,
};
use crate::message::types::{DispositionState, Message, StateUpdate};
use crate::store::backend::StoreBackend;
use crate::store::bridge::{BridgedStore, HostStoreBridge};
use crate::store::index::StateIndex;
use crate::store::paging::{CursorTable, PAGE_SIZE};
use crate::store::queue::OpQueue;
use crate::StoreError;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Where the direct backend keeps its per-account databases
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Parent of the `messages/{account}` database directories
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatstore");
        Self { data_dir }
    }
}

// ============================================================================
// MESSAGE STORAGE SERVICE
// ============================================================================

/// Message persistence service, one per running client.
///
/// `initialize` binds it to an account's store, `close` releases it; the
/// instance and its operation queue outlive both. Must be created inside
/// a tokio runtime since the queue worker is spawned at construction.
pub struct MessageStorage {
    config: StorageConfig,
    backend: RwLock<Option<Arc<StoreBackend>>>,
    queue: OpQueue,
    index: Arc<StateIndex>,
    cursors: Arc<CursorTable>,
}

impl MessageStorage {
    pub fn new(config: StorageConfig) -> Self {
        // Initialize tracing (idempotent)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();

        Self {
            config,
            backend: RwLock::new(None),
            queue: OpQueue::new(),
            index: Arc::new(StateIndex::new()),
            cursors: Arc::new(CursorTable::new()),
        }
    }

    /// Bind the service to `account`'s store. A second call while a store
    /// is active is a no-op.
    ///
    /// With `use_bridged` the logs live in the host process's file store
    /// and `bridge` must be given; otherwise an embedded database is
    /// opened under the configured data directory.
    pub async fn initialize(
        &self,
        account: &str,
        bridge: Option<Arc<dyn HostStoreBridge>>,
        use_bridged: bool,
    ) -> Result<(), StoreError> {
        if self.is_initialized() {
            debug!("Message store already initialized");
            return Ok(());
        }

        info!("Message store init for {}", account);
        let backend = if use_bridged {
            let bridge = bridge.ok_or(StoreError::MissingBridge)?;
            let store = BridgedStore::new(bridge, account);
            store.init().await?;
            StoreBackend::Bridged(store)
        } else {
            let path = self.config.data_dir.join("messages").join(account);
            StoreBackend::direct(&path)?
        };

        self.bind(backend);
        Ok(())
    }

    /// Bind the service to a volatile in-memory store
    pub fn initialize_memory(&self) {
        if self.is_initialized() {
            debug!("Message store already initialized");
            return;
        }
        self.bind(StoreBackend::memory());
    }

    fn bind(&self, backend: StoreBackend) {
        // fresh account state; the index warms on the next update_id_map
        self.index.clear();
        self.cursors.clear();
        *self.backend.write() = Some(Arc::new(backend));
    }

    /// Release the active store. Later operations resolve with empty
    /// results until the next `initialize`; tasks already queued still
    /// run against the store they captured.
    pub fn close(&self) {
        debug!("Message store closed");
        *self.backend.write() = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.read().is_some()
    }

    fn backend(&self) -> Option<Arc<StoreBackend>> {
        self.backend.read().clone()
    }

    // ------------------------------------------------------------------
    // Queued operations
    // ------------------------------------------------------------------

    /// Append `message` to its conversation log and record it in the
    /// index. A duplicate id is skipped and answers `None`; otherwise the
    /// updated log is returned.
    pub async fn add(&self, message: &Message) -> Result<Option<Vec<Message>>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let index = self.index.clone();
        let message = message.clone();

        self.queue
            .run(async move {
                let key = message.conversation_key().to_string();
                if index.contains(&message.id) {
                    debug!("Not saving message {}: already stored", message.id);
                    return Ok(None);
                }

                let mut log = match backend.get(&key).await? {
                    Some(bytes) => decode_log(&bytes)?,
                    None => StoredLog::new(),
                };
                // the index may be cold; the log itself has the last word
                for record in &log {
                    let stored = decode_record(record)?;
                    if stored.id == message.id {
                        debug!("Not saving message {}: already in log for {}", message.id, key);
                        return Ok(None);
                    }
                }

                index.record(&message.id, message.state.clone());
                log.push(encode_record(&message)?);
                debug!("Saving message {} for {}", message.id, key);
                backend.set(&key, encode_log(&log)?).await?;
                Ok(Some(decode_messages(&log)?))
            })
            .await?
    }

    /// Remove `message` from its conversation log by id, forgetting it in
    /// the index, and return what remains. A conversation that was never
    /// stored yields an empty list without a write.
    pub async fn remove_message(&self, message: &Message) -> Result<Vec<Message>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(Vec::new()),
        };
        let index = self.index.clone();
        let message = message.clone();

        self.queue
            .run(async move {
                let key = message.conversation_key().to_string();
                let log = match backend.get(&key).await? {
                    Some(bytes) => decode_log(&bytes)?,
                    None => return Ok(Vec::new()),
                };

                let stored_count = log.len();
                let mut kept = StoredLog::with_capacity(stored_count);
                for record in log {
                    let stored = decode_record(&record)?;
                    if stored.id == message.id {
                        index.forget(&stored.id);
                        continue;
                    }
                    kept.push(record);
                }
                if kept.len() != stored_count {
                    debug!("Removed message {} from {}", message.id, key);
                }

                backend.set(&key, encode_log(&kept)?).await?;
                Ok(decode_messages(&kept)?)
            })
            .await?
    }

    /// Alias for [`Self::remove_message`]
    pub async fn remove(&self, message: &Message) -> Result<Vec<Message>, StoreError> {
        self.remove_message(message).await
    }

    /// Apply a composition-state change wherever `message_id` is stored.
    ///
    /// Skips outright when the index already shows the target state.
    /// `displayed` entries are terminal and never overwritten. Returns
    /// the rewritten conversation log when a change landed, else `None`.
    pub async fn update(&self, change: &StateUpdate) -> Result<Option<Vec<Message>>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let index = self.index.clone();
        let change = change.clone();

        self.queue
            .run(async move {
                if index.state_of(&change.message_id) == Some(change.state.clone()) {
                    debug!(
                        "Message {} already {:?}, skipping update",
                        change.message_id, change.state
                    );
                    return Ok(None);
                }

                // ids are not conversation-keyed, so walk every log
                let found = backend
                    .iterate(|value, key, _ordinal| match rewrite_state(value, &change) {
                        Ok(Some(log)) => ControlFlow::Break(Ok((key.to_string(), log))),
                        Ok(None) => ControlFlow::Continue(()),
                        Err(err) => ControlFlow::Break(Err(err)),
                    })
                    .await?;

                let (key, log) = match found {
                    Some(Ok(hit)) => hit,
                    Some(Err(err)) => return Err(err),
                    None => return Ok(None),
                };

                debug!("Saving updated state for {}", key);
                backend.set(&key, encode_log(&log)?).await?;
                index.record(&change.message_id, change.state.clone());
                Ok(Some(decode_messages(&log)?))
            })
            .await?
    }

    /// Apply a disposition-state change wherever `id` is stored.
    ///
    /// Structurally like [`Self::update`] but with no terminal guard and
    /// no index involvement; dispositions live outside the index.
    pub async fn update_disposition(
        &self,
        id: &str,
        state: DispositionState,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let id = id.to_string();

        self.queue
            .run(async move {
                let found = backend
                    .iterate(
                        |value, key, _ordinal| match rewrite_disposition(value, &id, &state) {
                            Ok(Some(log)) => ControlFlow::Break(Ok((key.to_string(), log))),
                            Ok(None) => ControlFlow::Continue(()),
                            Err(err) => ControlFlow::Break(Err(err)),
                        },
                    )
                    .await?;

                let (key, log) = match found {
                    Some(Ok(hit)) => hit,
                    Some(Err(err)) => return Err(err),
                    None => return Ok(None),
                };

                debug!("Saving updated disposition for {}", key);
                backend.set(&key, encode_log(&log)?).await?;
                Ok(Some(decode_messages(&log)?))
            })
            .await?
    }

    /// Load the newest page of every conversation, keyed by conversation,
    /// seeding each pagination cursor at the oldest entry handed out.
    /// Conversations with empty logs map to empty lists and seed no
    /// cursor.
    pub async fn load_last_messages(&self) -> Result<HashMap<String, Vec<Message>>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(HashMap::new()),
        };
        let cursors = self.cursors.clone();

        self.queue
            .run(async move {
                let mut last_messages = HashMap::new();
                let keys = match backend.keys().await? {
                    Some(keys) => keys,
                    None => return Ok(last_messages),
                };

                for key in keys {
                    let bytes = match backend.get(&key).await? {
                        Some(bytes) => bytes,
                        // vanished between keys() and get()
                        None => continue,
                    };
                    let log = decode_log(&bytes)?;
                    let mut messages = decode_messages(&log)?;

                    let start = messages.len().saturating_sub(PAGE_SIZE);
                    let window = messages.split_off(start);
                    if let Some(oldest) = window.first() {
                        cursors.set(&key, &oldest.id);
                    }
                    last_messages.insert(key, window);
                }

                debug!("Loaded last messages for {} conversations", last_messages.len());
                Ok(last_messages)
            })
            .await?
    }

    /// Load up to one more page of older history for `key`, ending just
    /// before the current cursor, and move the cursor to the new oldest
    /// entry. `None` once the oldest stored entry has been handed out,
    /// or when no cursor is in play.
    pub async fn load_more_messages(&self, key: &str) -> Result<Option<Vec<Message>>, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let cursors = self.cursors.clone();
        let key = key.to_string();

        self.queue
            .run(async move {
                let cursor = match cursors.get(&key) {
                    Some(cursor) => cursor,
                    None => return Ok(None),
                };
                let bytes = match backend.get(&key).await? {
                    Some(bytes) => bytes,
                    None => return Ok(None),
                };
                let log = decode_log(&bytes)?;
                let messages = decode_messages(&log)?;
                debug!("Chat {} has {} stored messages", key, messages.len());

                let position = match messages.iter().position(|m| m.id == cursor) {
                    Some(position) if position > 0 => position,
                    // at the oldest entry, or the cursor id left the log
                    _ => return Ok(None),
                };

                let start = position.saturating_sub(PAGE_SIZE);
                let window = messages[start..position].to_vec();
                if let Some(oldest) = window.first() {
                    cursors.set(&key, &oldest.id);
                }
                Ok(Some(window))
            })
            .await?
    }

    /// Rebuild the id/state index from storage, wholesale
    pub async fn update_id_map(&self) -> Result<(), StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(()),
        };
        let index = self.index.clone();

        self.queue
            .run(async move {
                rebuild_index(&backend, &index).await?;
                debug!("Rebuilt id map with {} entries", index.len());
                Ok(())
            })
            .await?
    }

    /// Delete the whole conversation stored under `key`, then rebuild the
    /// index so its ids stop being reported.
    pub async fn remove_conversation(&self, key: &str) -> Result<(), StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(()),
        };
        let index = self.index.clone();
        let key = key.to_string();

        self.queue
            .run(async move {
                backend.remove(&key).await?;
                rebuild_index(&backend, &index).await?;
                debug!("Removed conversation {}", key);
                Ok(())
            })
            .await?
    }

    /// Clear every stored conversation for the active backend, along with
    /// the index and cursors derived from it.
    pub async fn drop_instance(&self) -> Result<(), StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(()),
        };
        let index = self.index.clone();
        let cursors = self.cursors.clone();

        self.queue
            .run(async move {
                backend.clear().await?;
                index.clear();
                cursors.clear();
                info!("Dropped message store instance");
                Ok(())
            })
            .await?
    }

    // ------------------------------------------------------------------
    // Unqueued reads and passthroughs
    // ------------------------------------------------------------------

    /// Whether `key` still has older entries to page in.
    ///
    /// Read-only and unqueued, so a mutation still in the queue may not
    /// be reflected in the answer.
    pub async fn has_more(&self, key: &str) -> Result<bool, StoreError> {
        let backend = match self.backend() {
            Some(backend) => backend,
            None => return Ok(false),
        };
        let cursor = match self.cursors.get(key) {
            Some(cursor) => cursor,
            None => return Ok(false),
        };
        let bytes = match backend.get(key).await? {
            Some(bytes) => bytes,
            None => return Ok(false),
        };
        let log = decode_log(&bytes)?;
        let messages = decode_messages(&log)?;

        match messages.iter().position(|m| m.id == cursor) {
            Some(position) if position > 0 => {
                debug!("{} has more messages to load", key);
                Ok(true)
            }
            _ => {
                debug!("{} has no more messages to load", key);
                Ok(false)
            }
        }
    }

    /// Raw read of the stored bytes under `key`, outside the queue
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.backend() {
            Some(backend) => backend.get(key).await,
            None => Ok(None),
        }
    }

    /// Raw write of `value` under `key`, outside the queue. Echoes the
    /// stored bytes back, or `None` when no store is active.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>, StoreError> {
        match self.backend() {
            Some(backend) => backend.set(key, value).await.map(Some),
            None => Ok(None),
        }
    }
}

impl Default for MessageStorage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

// ============================================================================
// LOG REWRITE HELPERS
// ============================================================================

/// Rewrite the log in `value` with `change` applied. `None` when it does
/// not contain the id, the state already matches, or the entry is
/// terminal.
fn rewrite_state(value: &[u8], change: &StateUpdate) -> Result<Option<StoredLog>, StoreError> {
    let log = decode_log(value)?;
    let mut rewritten = StoredLog::with_capacity(log.len());
    let mut changed = false;

    for record in &log {
        let mut stored = decode_record(record)?;
        if stored.id == change.message_id
            && stored.state != change.state
            && !stored.state.is_final()
        {
            debug!("Updating state for stored message {}", stored.id);
            stored.state = change.state.clone();
            rewritten.push(encode_record(&stored)?);
            changed = true;
        } else {
            rewritten.push(record.clone());
        }
    }

    Ok(if changed { Some(rewritten) } else { None })
}

/// Rewrite the log in `value` setting `id`'s disposition to `state`.
/// `None` when it does not contain the id or the disposition already
/// matches.
fn rewrite_disposition(
    value: &[u8],
    id: &str,
    state: &DispositionState,
) -> Result<Option<StoredLog>, StoreError> {
    let log = decode_log(value)?;
    let mut rewritten = StoredLog::with_capacity(log.len());
    let mut changed = false;

    for record in &log {
        let mut stored = decode_record(record)?;
        if stored.id == id && stored.disposition_state.as_ref() != Some(state) {
            debug!("Updating disposition for stored message {}", stored.id);
            stored.disposition_state = Some(state.clone());
            rewritten.push(encode_record(&stored)?);
            changed = true;
        } else {
            rewritten.push(record.clone());
        }
    }

    Ok(if changed { Some(rewritten) } else { None })
}

/// Clear and repopulate `index` from every stored log
async fn rebuild_index(backend: &StoreBackend, index: &StateIndex) -> Result<(), StoreError> {
    index.clear();
    let failure = backend
        .iterate(|value, _key, _ordinal| match index_log(value, index) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        })
        .await?;

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn index_log(value: &[u8], index: &StateIndex) -> Result<(), StoreError> {
    let log = decode_log(value)?;
    for record in &log {
        let stored = decode_record(record)?;
        index.record(&stored.id, stored.state);
    }
    Ok(())
}
