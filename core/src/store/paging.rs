// Pagination cursors - per conversation, the oldest id already handed out
//
// The UI pages backwards through history. For each conversation the table
// keeps the id of the oldest entry loaded so far; the next page ends just
// before it. Cursors only move toward older entries until the next full
// reload resets them.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Messages handed out per page
pub const PAGE_SIZE: usize = 30;

/// Oldest-loaded message id per conversation key
#[derive(Default)]
pub struct CursorTable {
    cursors: RwLock<HashMap<String, String>>,
}

impl CursorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor for `key`, if a page has been handed out for it
    pub fn get(&self, key: &str) -> Option<String> {
        self.cursors.read().get(key).cloned()
    }

    /// Move the cursor for `key` to `id`
    pub fn set(&self, key: &str, id: &str) {
        self.cursors.write().insert(key.to_string(), id.to_string());
    }

    /// Drop every cursor
    pub fn clear(&self) {
        self.cursors.write().clear();
    }
}
