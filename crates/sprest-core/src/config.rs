//! Centralized configuration for sprest.
//!
//! Constants live in the `*Config` tables; per-client runtime settings live in
//! [`RuntimeConfig`], which is built once by the host and handed to every
//! component at construction time. Nothing in the core reads ambient global
//! state.

use crate::error::{Result, SpRestError};
use crate::network::{Headers, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Network-related constants.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const RETRY_MAX_ATTEMPTS: u32 = 7;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("NONISV|sprest|sprest/", env!("CARGO_PKG_VERSION"));
    pub const CLIENT_TAG: &'static str = concat!("sprest:", env!("CARGO_PKG_VERSION"));
    pub const BATCH_CLIENT_TAG: &'static str = concat!("sprest:", env!("CARGO_PKG_VERSION"), ":batch");
}

/// OData endpoint paths, header names and media types.
pub struct ODataConfig;

impl ODataConfig {
    pub const API_SEGMENT: &'static str = "_api/";
    pub const CONTEXT_INFO_PATH: &'static str = "/_api/contextinfo";
    pub const BATCH_PATH: &'static str = "/_api/$batch";

    pub const ACCEPT_JSON: &'static str = "application/json";
    pub const ACCEPT_VERBOSE: &'static str = "application/json;odata=verbose";
    pub const CONTENT_TYPE_VERBOSE: &'static str = "application/json;odata=verbose;charset=utf-8";

    pub const HEADER_ACCEPT: &'static str = "Accept";
    pub const HEADER_AUTHORIZATION: &'static str = "Authorization";
    pub const HEADER_CLIENT_TAG: &'static str = "X-ClientService-ClientTag";
    pub const HEADER_CONTENT_TYPE: &'static str = "Content-Type";
    pub const HEADER_DIGEST: &'static str = "X-RequestDigest";
    pub const HEADER_METHOD_OVERRIDE: &'static str = "X-HTTP-Method";
    pub const HEADER_USER_AGENT: &'static str = "User-Agent";
}

/// Which client store a cached response goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-lifetime in-memory store.
    #[default]
    Session,
    /// Persistent store (SQLite when configured).
    Local,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Session => write!(f, "session"),
            StoreKind::Local => write!(f, "local"),
        }
    }
}

/// Runtime configuration read by the core. Read-only once the client is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Absolute web url used to resolve relative request urls.
    pub base_url: Option<String>,
    /// Headers merged into every request before the per-request headers.
    pub headers: Headers,
    /// Store used when caching options do not name one.
    pub default_caching_store: StoreKind,
    /// Default time-to-live for cached responses, in seconds.
    pub default_caching_timeout_secs: u64,
    /// Turns every `using_caching` call into a no-op.
    pub global_cache_disable: bool,
    /// Periodically sweep expired entries out of both stores.
    pub enable_cache_expiration: bool,
    /// Interval between expiration sweeps, in milliseconds.
    pub cache_expiration_interval_ms: u64,
    /// Per-request timeout applied by the bundled reqwest transport.
    pub request_timeout_secs: u64,
    /// Backoff settings for the retry transport.
    pub retry: RetryConfig,
}

impl RuntimeConfig {
    pub const DEFAULT_CACHING_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_CACHE_EXPIRATION_INTERVAL_MS: u64 = 750;

    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| SpRestError::io_with_path(e, path))?;
        serde_json::from_str(&contents).map_err(|e| SpRestError::Config {
            message: format!("Invalid config file {}: {}", path.display(), e),
        })
    }

    /// Set the base url.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a global header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set the default caching timeout.
    pub fn with_default_caching_timeout(mut self, timeout: Duration) -> Self {
        self.default_caching_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the default caching store.
    pub fn with_default_caching_store(mut self, store: StoreKind) -> Self {
        self.default_caching_store = store;
        self
    }

    /// Disable (or re-enable) caching globally.
    pub fn with_global_cache_disable(mut self, disable: bool) -> Self {
        self.global_cache_disable = disable;
        self
    }

    /// Enable the background expiration sweep.
    pub fn with_cache_expiration(mut self, interval: Duration) -> Self {
        self.enable_cache_expiration = true;
        self.cache_expiration_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Replace the retry settings.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_caching_timeout(&self) -> Duration {
        Duration::from_secs(self.default_caching_timeout_secs)
    }

    pub fn cache_expiration_interval(&self) -> Duration {
        Duration::from_millis(self.cache_expiration_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: Headers::new(),
            default_caching_store: StoreKind::Session,
            default_caching_timeout_secs: Self::DEFAULT_CACHING_TIMEOUT_SECS,
            global_cache_disable: false,
            enable_cache_expiration: false,
            cache_expiration_interval_ms: Self::DEFAULT_CACHE_EXPIRATION_INTERVAL_MS,
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            retry: RetryConfig::default(),
        }
    }
}
