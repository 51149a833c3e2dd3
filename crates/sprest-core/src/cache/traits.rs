//! Cache store trait and entry type.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A cached value and the instant it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub expiration: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, expiration: DateTime<Utc>) -> Self {
        Self { value, expiration }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Key used by the default availability probe.
const PROBE_KEY: &str = "__sprest_probe__";

/// Pluggable key/value store backing the response cache.
///
/// Stores hand back entries as written, expired or not. Expiry is enforced
/// by [`ClientStore`](super::ClientStore). All operations are synchronous to
/// match rusqlite's API.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite an entry.
    fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    /// Whether the store can be used at all.
    ///
    /// The default writes and deletes a probe key.
    fn is_available(&self) -> bool {
        let probe = CacheEntry::new(Value::Bool(true), Utc::now());
        self.put(PROBE_KEY, probe).is_ok() && self.delete(PROBE_KEY).is_ok()
    }

    /// Remove every entry expired at `now`, returning how many were removed.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys()? {
            if let Some(entry) = self.get(&key)? {
                if entry.is_expired_at(now) {
                    self.delete(&key)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("Removed {} expired cache entries", removed);
        }
        Ok(removed)
    }
}

/// A store that is never available. Every read through a
/// [`ClientStore`](super::ClientStore) over it is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl CacheStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _entry: CacheEntry) -> Result<()> {
        Err(crate::SpRestError::Cache {
            message: "store is not available".into(),
        })
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn is_available(&self) -> bool {
        false
    }
}
