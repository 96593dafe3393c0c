//! Bounded in-memory layer of the client cache variant.
//!
//! Recency is tracked in a separate access map stamped from a logical clock.
//! On insert over capacity, the access map is scanned for the oldest key.

use std::collections::HashMap;

use super::entry::CacheEntry;

/// Default number of resolved entries held in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct LruMemory<T> {
    capacity: usize,
    entries: HashMap<String, CacheEntry<T>>,
    accessed: HashMap<String, u64>,
    clock: u64,
}

impl<T> LruMemory<T> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: HashMap::new(), accessed: HashMap::new(), clock: 0 }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up an entry, refreshing its recency.
    pub fn get(&mut self, uniqueness_hash: &str) -> Option<&CacheEntry<T>> {
        if !self.entries.contains_key(uniqueness_hash) {
            return None;
        }
        let stamp = self.tick();
        self.accessed.insert(uniqueness_hash.to_string(), stamp);
        self.entries.get(uniqueness_hash)
    }

    /// Insert or replace an entry. Returns the evicted key, if any.
    pub fn insert(&mut self, entry: CacheEntry<T>) -> Option<String> {
        let key = entry.uniqueness_hash.clone();
        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            evicted = self.evict_oldest();
        }

        let stamp = self.tick();
        self.accessed.insert(key.clone(), stamp);
        self.entries.insert(key, entry);
        evicted
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .accessed
            .iter()
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(key, _)| key.clone())?;

        self.accessed.remove(&oldest);
        self.entries.remove(&oldest);
        tracing::debug!(key = %oldest, "evicted least recently used cache entry");
        Some(oldest)
    }

    pub fn remove(&mut self, uniqueness_hash: &str) {
        self.entries.remove(uniqueness_hash);
        self.accessed.remove(uniqueness_hash);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.accessed.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, uniqueness_hash: &str) -> bool {
        self.entries.contains_key(uniqueness_hash)
    }
}
