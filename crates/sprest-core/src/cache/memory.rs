//! In-memory session store.

use super::traits::{CacheEntry, CacheStore};
use crate::error::Result;
use mini_moka::sync::Cache;

/// Process-lifetime store backed by a bounded mini-moka cache.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, CacheEntry>,
}

impl MemoryStore {
    pub const DEFAULT_CAPACITY: u64 = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_entries).build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(&key.to_string()))
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.invalidate(&key.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}
