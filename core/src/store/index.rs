// Id/state index - which message ids storage already holds
//
// A cache over the stored logs, message id to composition state. It is
// rebuilt wholesale from storage and consulted to skip duplicate appends
// and no-op state updates. Never a source of truth: when in doubt the
// logs win, and the next rebuild heals any drift.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::message::MessageState;

/// Rebuildable map of stored message ids to their last known state
#[derive(Default)]
pub struct StateIndex {
    entries: RwLock<HashMap<String, MessageState>>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known state for `id`, if storage holds it
    pub fn state_of(&self, id: &str) -> Option<MessageState> {
        self.entries.read().get(id).cloned()
    }

    /// Whether storage already holds `id`
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Record `id` at `state`
    pub fn record(&self, id: &str, state: MessageState) {
        self.entries.write().insert(id.to_string(), state);
    }

    /// Forget `id` after its record left storage
    pub fn forget(&self, id: &str) {
        self.entries.write().remove(id);
    }

    /// Drop everything, ahead of a wholesale rebuild
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
