// Store module - conversation log persistence

pub mod backend;
pub mod bridge;
pub mod index;
pub mod messages;
pub mod paging;
pub mod queue;

pub use backend::{DirectStore, MemoryStore, StoreBackend};
pub use bridge::{BridgedStore, HostStoreBridge};
pub use index::StateIndex;
pub use messages::{MessageStorage, StorageConfig};
pub use paging::{CursorTable, PAGE_SIZE};
pub use queue::OpQueue;
