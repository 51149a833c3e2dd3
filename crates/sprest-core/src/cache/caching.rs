//! Caching options and the parser wrapper that fills the cache.

use super::storage::ClientStore;
use crate::config::{RuntimeConfig, StoreKind};
use crate::network::HttpResponse;
use crate::parsers::ResponseParser;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Per-request caching settings. Unset fields take their defaults when the
/// request is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachingOptions {
    /// Cache key (default: the lower-cased absolute request url).
    pub key: Option<String>,
    /// Absolute expiration (default: now + configured timeout).
    pub expiration: Option<DateTime<Utc>>,
    /// Target store (default: the configured default store).
    pub store: Option<StoreKind>,
}

impl CachingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_store(mut self, store: StoreKind) -> Self {
        self.store = Some(store);
        self
    }

    /// Fill in the key and store for a request to `url`.
    pub fn resolve(&self, url: &str, config: &RuntimeConfig) -> ResolvedCaching {
        ResolvedCaching {
            key: self.key.clone().unwrap_or_else(|| url.to_lowercase()),
            expiration: self.expiration,
            store: self.store.unwrap_or(config.default_caching_store),
        }
    }
}

/// Caching options with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCaching {
    pub key: String,
    pub expiration: Option<DateTime<Utc>>,
    pub store: StoreKind,
}

/// Wraps a parser and stores each successfully parsed value.
pub struct CachingParser<P> {
    inner: P,
    store: ClientStore,
    key: String,
    expiration: Option<DateTime<Utc>>,
}

impl<P: ResponseParser> CachingParser<P> {
    pub fn new(inner: P, store: ClientStore, caching: ResolvedCaching) -> Self {
        Self {
            inner,
            store,
            key: caching.key,
            expiration: caching.expiration,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<P: ResponseParser> ResponseParser for CachingParser<P> {
    type Output = P::Output;

    async fn parse(&self, response: HttpResponse) -> Result<P::Output> {
        let value = self.inner.parse(response).await?;
        // a failed write never fails the request
        match self.store.put(&self.key, &value, self.expiration) {
            Ok(()) => debug!("Cached response under {}", self.key),
            Err(e) => warn!("Failed to cache response under {}: {}", self.key, e),
        }
        Ok(value)
    }

    fn hydrate(&self, value: Value) -> Result<P::Output> {
        self.inner.hydrate(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::parsers::ODataDefaultParser;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> ClientStore {
        ClientStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(60))
    }

    #[test]
    fn test_resolve_defaults() {
        let config = RuntimeConfig::default().with_default_caching_store(StoreKind::Local);
        let resolved = CachingOptions::new().resolve("https://Contoso/_api/Web", &config);
        assert_eq!(resolved.key, "https://contoso/_api/web");
        assert_eq!(resolved.store, StoreKind::Local);
        assert_eq!(resolved.expiration, None);

        let explicit = CachingOptions::new()
            .with_key("lists")
            .with_store(StoreKind::Session)
            .resolve("https://contoso/_api/web", &config);
        assert_eq!(explicit.key, "lists");
        assert_eq!(explicit.store, StoreKind::Session);
    }

    #[tokio::test]
    async fn test_successful_parse_is_cached() {
        let store = store();
        let caching = CachingOptions::new().resolve("https://contoso/_api/web", &RuntimeConfig::default());
        let parser = CachingParser::new(ODataDefaultParser::<Value>::new(), store.clone(), caching);

        let value = parser
            .parse(HttpResponse::from_status(200).with_body(r#"{"d":{"Title":"Dev"}}"#))
            .await
            .unwrap();

        assert_eq!(value, json!({"Title": "Dev"}));
        assert_eq!(store.get_value("https://contoso/_api/web"), Some(json!({"Title": "Dev"})));
    }

    #[tokio::test]
    async fn test_failed_parse_is_not_cached() {
        let store = store();
        let caching = CachingOptions::new().with_key("k").resolve("", &RuntimeConfig::default());
        let parser = CachingParser::new(ODataDefaultParser::<Value>::new(), store.clone(), caching);

        assert!(parser.parse(HttpResponse::from_status(500)).await.is_err());
        assert_eq!(store.get_value("k"), None);
    }
}
