// Chatstore Core - message persistence for chat clients
//
// Conversation logs keyed by correspondent, one serialized operation lane,
// a rebuildable id/state index, and pagination cursors. Storage is
// pluggable: embedded database, host-process file store, or volatile
// memory for tests.

pub mod message;
pub mod store;

use thiserror::Error;

pub use message::{DispositionState, Message, MessageState, StateUpdate};
pub use store::{HostStoreBridge, MessageStorage, StorageConfig, PAGE_SIZE};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Operation queue closed")]
    QueueClosed,
    #[error("Bridged store requested without a host bridge")]
    MissingBridge,
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Serialization(format!("{:#}", err))
    }
}
