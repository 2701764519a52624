//! In-process cache backend

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::{Cache, CacheEntry, CacheError};

/// Thread-safe in-memory cache
///
/// Besides the entries it keeps a count of `put` calls per key, which is
/// handy for checking how often a fragment was recomputed.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    writes: Mutex<HashMap<String, usize>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls recorded for `key`
    pub fn writes(&self, key: &str) -> usize {
        let writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes.get(key).copied().unwrap_or(0)
    }

    /// Number of `put` calls across all keys
    pub fn total_writes(&self) -> usize {
        let writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes.values().sum()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn has(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).is_some_and(|entry| !entry.is_expired())
    }

    fn get(&self, key: &str) -> Result<String, CacheError> {
        let entry = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(key).cloned()
        };
        entry
            .ok_or_else(|| CacheError::NotFound {
                key: key.to_string(),
            })?
            .into_payload(key)
    }

    fn put(&self, key: &str, content: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(content, ttl);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        *self
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}
