use dashmap::DashMap;

use crate::models::SessionRecord;

/// Process-local session tier.
///
/// Created once at startup and shared behind an `Arc`; entries live until the
/// process exits or `clear` is called. No eviction.
#[derive(Debug, Default)]
pub struct MemoryTier {
    sessions: DashMap<String, SessionRecord>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn insert(&self, key: &str, record: SessionRecord) {
        self.sessions.insert(key.to_string(), record);
    }

    pub fn get(&self, key: &str) -> Option<SessionRecord> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<SessionRecord> {
        self.sessions.remove(key).map(|(_, record)| record)
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
