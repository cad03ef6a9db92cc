//! Bounded in-memory cache for upstream analytics responses.
//!
//! Keys are the sha256 of the canonically-serialized query. Entries have no
//! absolute expiry; they live for the process lifetime. On inserting into a
//! full cache the oldest half of the entries is evicted in insertion order.
//! Bulk FIFO, not LRU: recently-used entries are deliberately not protected,
//! and downstream staleness assumptions depend on exactly this policy.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub inserted_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Normalized cache key for a request payload. `serde_json` maps are
    /// key-ordered, so equal queries serialize identically.
    pub fn key_for(query: &Value) -> String {
        let canonical = query.to_string();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.payload.clone())
    }

    pub fn insert(&mut self, key: String, payload: Value) {
        if let Some(existing) = self.entries.get_mut(&key) {
            existing.payload = payload;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest_half();
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently cached, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    fn evict_oldest_half(&mut self) {
        let evict = self.capacity / 2;
        for _ in 0..evict {
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(&key);
            }
        }
    }
}
