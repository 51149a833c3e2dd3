//! Client façade.
//!
//! [`SpRestClient`] owns the shared HTTP client, the response stores and the
//! pipeline, and exposes the three entry points callers need: issuing a
//! request, creating a batch and fetching a write credential.

use crate::address::ResourceAddress;
use crate::batch::Batch;
use crate::cache::{
    CacheStore, CachingOptions, ClientStorage, MemoryStore, SqliteStore, UnavailableStore,
};
use crate::config::RuntimeConfig;
use crate::network::{DynTransport, ReqwestTransport, RequestOptions, SpHttpClient};
use crate::parsers::ResponseParser;
use crate::pipeline::{Pipeline, PreparedRequest, RequestHandle};
use crate::Result;
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Entry point for issuing requests against a SharePoint-style REST API.
///
/// Cheap to share behind an `Arc`; every request and batch it creates holds
/// its own references to the underlying collaborators.
pub struct SpRestClient {
    config: Arc<RuntimeConfig>,
    http: Arc<SpHttpClient>,
    pipeline: Pipeline,
    sweeper: Option<JoinHandle<()>>,
}

impl SpRestClient {
    /// Create a client with the bundled reqwest transport and in-memory
    /// session store.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a builder for more control over transport and stores.
    pub fn builder(config: RuntimeConfig) -> SpRestClientBuilder {
        SpRestClientBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn http(&self) -> &Arc<SpHttpClient> {
        &self.http
    }

    pub fn storage(&self) -> &ClientStorage {
        self.pipeline.storage()
    }

    /// Start building a request against `address`. Defaults to GET.
    pub fn request<P: ResponseParser>(
        &self,
        address: &ResourceAddress,
        parser: P,
    ) -> PreparedRequest<P> {
        self.pipeline.request(address, parser)
    }

    /// Issue a request in one call.
    ///
    /// Equivalent to [`request`](Self::request) followed by the matching
    /// builder calls and `issue`.
    pub fn issue_request<P: ResponseParser>(
        &self,
        address: &ResourceAddress,
        method: Method,
        options: RequestOptions,
        parser: P,
        caching: Option<CachingOptions>,
        batch: Option<&Batch>,
    ) -> Result<RequestHandle<P::Output>> {
        let mut request = self.request(address, parser).method(method).options(options);
        if let Some(caching) = caching {
            request = request.using_caching(caching);
        }
        if let Some(batch) = batch {
            request = request.in_batch(batch)?;
        }
        request.issue()
    }

    /// Create an empty batch posting to `<base_url>/_api/$batch`.
    pub fn create_batch(&self, base_url: impl Into<String>) -> Batch {
        Batch::new(base_url, self.http.clone())
    }

    /// Form digest for the web that owns `url`, fetched or reused from cache.
    pub async fn get_credential(&self, url: &str) -> Result<String> {
        self.http.get_digest(url).await
    }
}

impl Drop for SpRestClient {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Builder for configuring [`SpRestClient`] construction.
///
/// # Example
///
/// ```rust,ignore
/// use sprest_core::{RuntimeConfig, SpRestClient};
///
/// let client = SpRestClient::builder(RuntimeConfig::new())
///     .sqlite_path("/var/cache/sprest/cache.db")
///     .build()?;
/// ```
pub struct SpRestClientBuilder {
    config: RuntimeConfig,
    transport: Option<DynTransport>,
    local_store: Option<Arc<dyn CacheStore>>,
    session_store: Option<Arc<dyn CacheStore>>,
    sqlite_path: Option<PathBuf>,
}

impl SpRestClientBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            transport: None,
            local_store: None,
            session_store: None,
            sqlite_path: None,
        }
    }

    /// Send requests through `transport` instead of the bundled reqwest one.
    pub fn transport(mut self, transport: DynTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `store` as the local (persistent) store.
    ///
    /// Takes precedence over [`sqlite_path`](Self::sqlite_path).
    pub fn local_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Use `store` as the session store.
    ///
    /// Default: an in-memory store.
    pub fn session_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Persist the local store in a SQLite database at `path`.
    ///
    /// Without this (or [`local_store`](Self::local_store)) the local store is
    /// unavailable and requests cached there always miss.
    pub fn sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    /// Build the client.
    ///
    /// The expiration sweep is only started when called from within a tokio
    /// runtime.
    pub fn build(self) -> Result<SpRestClient> {
        let config = Arc::new(self.config);

        let transport: DynTransport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_timeout(config.request_timeout())?),
        };

        let local: Arc<dyn CacheStore> = match (self.local_store, self.sqlite_path) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                info!("Opening local cache store at {}", path.display());
                Arc::new(SqliteStore::open(&path)?)
            }
            (None, None) => Arc::new(UnavailableStore),
        };
        let session = self
            .session_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let storage = ClientStorage::new(local, session, &config);
        let http = Arc::new(SpHttpClient::new(transport, config.clone()));
        let pipeline = Pipeline::new(http.clone(), storage.clone());

        let sweeper = if config.enable_cache_expiration {
            spawn_sweeper(storage, &config)
        } else {
            None
        };

        Ok(SpRestClient {
            config,
            http,
            pipeline,
            sweeper,
        })
    }
}

fn spawn_sweeper(storage: ClientStorage, config: &RuntimeConfig) -> Option<JoinHandle<()>> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!("Cache expiration requested outside a tokio runtime, sweep disabled");
        return None;
    };
    let period = config.cache_expiration_interval();
    debug!("Starting cache expiration sweep every {:?}", period);

    Some(handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match storage.delete_expired() {
                Ok(0) => {}
                Ok(removed) => debug!("Removed {} expired cache entries", removed),
                Err(e) => warn!("Cache expiration sweep failed: {}", e),
            }
        }
    }))
}
