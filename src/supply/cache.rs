//! Short-lived batch cache keyed by (topic, level)
//!
//! Process-wide for one supply service, never persisted.

use std::collections::HashMap;

use crate::sim::Problem;

#[derive(Debug, Clone)]
struct CacheEntry {
    problems: Vec<Problem>,
    stored_at_ms: u64,
}

/// TTL cache of generated batches
#[derive(Debug, Clone)]
pub struct SupplyCache {
    ttl_ms: u64,
    entries: HashMap<(String, u32), CacheEntry>,
}

impl SupplyCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    fn key(topic: &str, level: u32) -> (String, u32) {
        (topic.trim().to_lowercase(), level)
    }

    /// Fresh batch for the key, if any. Expired entries are dropped.
    pub fn get(&mut self, topic: &str, level: u32, now_ms: u64) -> Option<Vec<Problem>> {
        let key = Self::key(topic, level);
        let fresh = match self.entries.get(&key) {
            Some(entry) => now_ms.saturating_sub(entry.stored_at_ms) < self.ttl_ms,
            None => return None,
        };
        if fresh {
            self.entries.get(&key).map(|entry| entry.problems.clone())
        } else {
            self.entries.remove(&key);
            None
        }
    }

    pub fn insert(&mut self, topic: &str, level: u32, problems: Vec<Problem>, now_ms: u64) {
        self.entries.insert(
            Self::key(topic, level),
            CacheEntry {
                problems,
                stored_at_ms: now_ms,
            },
        );
    }

    /// Drop every expired entry
    pub fn purge_expired(&mut self, now_ms: u64) {
        let ttl = self.ttl_ms;
        self.entries
            .retain(|_, entry| now_ms.saturating_sub(entry.stored_at_ms) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
