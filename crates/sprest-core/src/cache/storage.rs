//! Expiring typed wrapper over a [`CacheStore`], and the local/session pair.

use super::memory::MemoryStore;
use super::traits::{CacheEntry, CacheStore, UnavailableStore};
use crate::config::{RuntimeConfig, StoreKind};
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A cache store with expiry and typed access.
///
/// Availability is probed once at construction. A disabled store turns every
/// read into a miss and every write into a no-op.
#[derive(Clone)]
pub struct ClientStore {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    default_timeout: Duration,
}

impl ClientStore {
    pub fn new(store: Arc<dyn CacheStore>, default_timeout: Duration) -> Self {
        let enabled = store.is_available();
        if !enabled {
            warn!("Cache store is not available; caching through it is disabled");
        }
        Self {
            store,
            enabled,
            default_timeout,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Expiration applied when a caller gives none.
    pub fn default_expiration(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.default_timeout).unwrap_or_default()
    }

    /// Raw JSON value for `key`, if present and unexpired.
    ///
    /// Expired entries are deleted. Store failures are logged and reported
    /// as a miss.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let entry = match self.store.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Cache read for {} failed: {}", key, e);
                return None;
            }
        };

        if entry.is_expired_at(Utc::now()) {
            if let Err(e) = self.store.delete(key) {
                warn!("Failed to evict expired cache entry {}: {}", key, e);
            }
            return None;
        }

        Some(entry.value)
    }

    /// Typed read. A value that no longer deserializes is a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Cached value for {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Store `value` until `expiration` (default: now + default timeout).
    pub fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = CacheEntry::new(
            serde_json::to_value(value)?,
            expiration.unwrap_or_else(|| self.default_expiration()),
        );
        self.store.put(key, entry)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.store.delete(key)
    }

    /// Return the cached value, or run `getter`, store its result and return it.
    ///
    /// With the store disabled, `getter` runs every time.
    pub async fn get_or_put<T, F, Fut>(
        &self,
        key: &str,
        getter: F,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let value = getter().await?;
        self.put(key, &value, expiration)?;
        Ok(value)
    }

    /// Remove every expired entry from the underlying store.
    pub fn delete_expired(&self) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        self.store.delete_expired(Utc::now())
    }
}

/// The pair of stores a client caches into.
#[derive(Clone)]
pub struct ClientStorage {
    pub local: ClientStore,
    pub session: ClientStore,
}

impl ClientStorage {
    pub fn new(
        local: Arc<dyn CacheStore>,
        session: Arc<dyn CacheStore>,
        config: &RuntimeConfig,
    ) -> Self {
        let timeout = config.default_caching_timeout();
        Self {
            local: ClientStore::new(local, timeout),
            session: ClientStore::new(session, timeout),
        }
    }

    /// Session store in memory, no local store.
    pub fn in_memory(config: &RuntimeConfig) -> Self {
        Self::new(Arc::new(UnavailableStore), Arc::new(MemoryStore::new()), config)
    }

    pub fn store(&self, kind: StoreKind) -> &ClientStore {
        match kind {
            StoreKind::Local => &self.local,
            StoreKind::Session => &self.session,
        }
    }

    /// Sweep both stores, returning the total number of entries removed.
    pub fn delete_expired(&self) -> Result<usize> {
        Ok(self.local.delete_expired()? + self.session.delete_expired()?)
    }
}
