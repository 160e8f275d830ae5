//! Per-user cache of assembled [`ConversationMemory`].
//!
//! The cache is an accelerator only.  The turn and session stores stay the
//! source of truth, so any implementation may drop entries at will.
//! Concurrent writers for the same user race and the last write wins.

use std::collections::HashMap;
use std::sync::RwLock;

use recall_types::{ConversationMemory, UserId};

/// Capability injected into the assembly service.
pub trait ContextCache: Send + Sync {
    fn get(&self, user_id: UserId) -> Option<ConversationMemory>;
    fn put(&self, user_id: UserId, memory: ConversationMemory);
    /// Returns `true` when an entry was removed.
    fn invalidate(&self, user_id: UserId) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local map guarded by an `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryContextCache {
    entries: RwLock<HashMap<UserId, ConversationMemory>>,
}

impl InMemoryContextCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextCache for InMemoryContextCache {
    fn get(&self, user_id: UserId) -> Option<ConversationMemory> {
        // A poisoned lock only means a writer panicked mid-insert; the map
        // itself is still usable.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&user_id).cloned()
    }

    fn put(&self, user_id: UserId, memory: ConversationMemory) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(user_id, memory);
    }

    fn invalidate(&self, user_id: UserId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&user_id).is_some()
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Never stores anything; every read is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

impl ContextCache for DisabledCache {
    fn get(&self, _: UserId) -> Option<ConversationMemory> {
        None
    }

    fn put(&self, _: UserId, _: ConversationMemory) {}

    fn invalidate(&self, _: UserId) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }
}
