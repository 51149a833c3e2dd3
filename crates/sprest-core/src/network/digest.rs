//! Form digest cache.
//!
//! Write requests carry an `X-RequestDigest` header obtained from the web's
//! `_api/contextinfo` endpoint. Digests are cached per web url until the
//! service-provided timeout elapses. Each web url has its own async slot so
//! concurrent misses share a single refresh.

use super::http::{HttpRequest, Headers};
use super::retry::RetryTransport;
use crate::address::combine_paths;
use crate::config::{ODataConfig, RuntimeConfig};
use crate::{Result, SpRestError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A form digest and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDigest {
    pub value: String,
    pub expiration: DateTime<Utc>,
}

impl CachedDigest {
    pub fn new(value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expiration,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiration
    }
}

type DigestSlot = Arc<tokio::sync::Mutex<Option<CachedDigest>>>;

/// Per-web cache of form digests.
pub struct DigestCache {
    transport: Arc<RetryTransport>,
    config: Arc<RuntimeConfig>,
    slots: Mutex<HashMap<String, DigestSlot>>,
}

impl DigestCache {
    pub fn new(transport: Arc<RetryTransport>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            transport,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The web url owning `url`: everything before `_api/`.
    pub fn web_url_of(url: &str) -> Result<String> {
        match url.find(ODataConfig::API_SEGMENT) {
            Some(index) => Ok(url[..index].to_string()),
            None => Err(SpRestError::ApiUrl {
                url: url.to_string(),
            }),
        }
    }

    fn cache_key(web_url: &str) -> String {
        let normalized = url::Url::parse(web_url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| web_url.to_string());
        normalized.trim_end_matches('/').to_lowercase()
    }

    /// The slot for `web_url`. Slots of other webs that nobody holds and
    /// whose digest is missing or expired are dropped on the way, so the map
    /// only keeps webs with a live digest or a refresh in flight.
    fn slot(&self, web_url: &str) -> DigestSlot {
        let key = Self::cache_key(web_url);
        let now = Utc::now();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|k, slot| {
            *k == key
                || Arc::strong_count(slot) > 1
                || slot.try_lock().map_or(true, |cached| {
                    cached.as_ref().is_some_and(|d| d.is_valid_at(now))
                })
        });
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Return a valid digest for `web_url`, fetching one when needed.
    pub async fn get_digest(&self, web_url: &str) -> Result<String> {
        let slot = self.slot(web_url);
        let mut cached = slot.lock().await;

        if let Some(digest) = cached.as_ref().filter(|d| d.is_valid_at(Utc::now())) {
            debug!("Using cached form digest for {}", web_url);
            return Ok(digest.value.clone());
        }

        let digest = self.fetch_digest(web_url).await?;
        let value = digest.value.clone();
        *cached = Some(digest);
        Ok(value)
    }

    /// Prime the cache with a digest obtained elsewhere.
    pub async fn insert(&self, web_url: &str, digest: CachedDigest) {
        let slot = self.slot(web_url);
        *slot.lock().await = Some(digest);
    }

    /// Drop every cached digest.
    pub fn clear(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn fetch_digest(&self, web_url: &str) -> Result<CachedDigest> {
        let url = combine_paths(&[web_url, ODataConfig::CONTEXT_INFO_PATH]);
        info!("Refreshing form digest from {}", url);

        let mut headers = Headers::new();
        headers.set(ODataConfig::HEADER_ACCEPT, ODataConfig::ACCEPT_VERBOSE);
        headers.set(ODataConfig::HEADER_CONTENT_TYPE, ODataConfig::CONTENT_TYPE_VERBOSE);
        for (name, value) in self.config.headers.iter() {
            headers.set_if_missing(name, value);
        }

        let request = HttpRequest::new(Method::POST, url).with_headers(headers);
        let context_error = |message: String| SpRestError::ContextInfo {
            web_url: web_url.to_string(),
            message,
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| context_error(e.to_string()))?;
        let json: Value = response.json().map_err(|e| context_error(e.to_string()))?;
        let (value, timeout_secs) = parse_context_info(&json).ok_or_else(|| {
            context_error("response has no FormDigestValue/FormDigestTimeoutSeconds".into())
        })?;
        let expiration = digest_expiration(Utc::now(), timeout_secs).ok_or_else(|| {
            context_error(format!("invalid FormDigestTimeoutSeconds {}", timeout_secs))
        })?;

        Ok(CachedDigest { value, expiration })
    }
}

/// `now + timeout_secs`, or `None` for a non-positive or out of range timeout.
fn digest_expiration(now: DateTime<Utc>, timeout_secs: i64) -> Option<DateTime<Utc>> {
    if timeout_secs <= 0 {
        return None;
    }
    ChronoDuration::try_seconds(timeout_secs).and_then(|timeout| now.checked_add_signed(timeout))
}

/// Accepts both the verbose (`d.GetContextWebInformation`) and flat shapes.
fn parse_context_info(json: &Value) -> Option<(String, i64)> {
    let info = json
        .get("d")
        .and_then(|d| d.get("GetContextWebInformation"))
        .or_else(|| json.get("GetContextWebInformation"))
        .unwrap_or(json);

    let value = info.get("FormDigestValue")?.as_str()?.to_string();
    let timeout = info.get("FormDigestTimeoutSeconds")?;
    let timeout = timeout
        .as_i64()
        .or_else(|| timeout.as_str().and_then(|s| s.parse().ok()))?;
    Some((value, timeout))
}
