//! HTTP client used by the pipeline and the batch engine.
//!
//! Provides:
//! - Header merging (global config headers, then per-request headers)
//! - Default OData headers when the caller set none
//! - Form digest attachment for write requests
//! - Retry on throttling through [`RetryTransport`]

use super::digest::DigestCache;
use super::http::{HttpRequest, HttpResponse, RequestOptions};
use super::retry::{RetryConfig, RetryTransport};
use super::transport::DynTransport;
use crate::config::{NetworkConfig, ODataConfig, RuntimeConfig};
use crate::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

pub struct SpHttpClient {
    transport: Arc<RetryTransport>,
    digests: DigestCache,
    config: Arc<RuntimeConfig>,
}

impl SpHttpClient {
    /// Create a client over `transport` using the retry settings from `config`.
    pub fn new(transport: DynTransport, config: Arc<RuntimeConfig>) -> Self {
        Self::with_retry(transport, config.retry.clone(), config)
    }

    pub fn with_retry(
        transport: DynTransport,
        retry: RetryConfig,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        let transport = Arc::new(RetryTransport::new(transport, retry));
        let digests = DigestCache::new(transport.clone(), config.clone());
        Self {
            transport,
            digests,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn digests(&self) -> &DigestCache {
        &self.digests
    }

    /// Send a request to `url`.
    ///
    /// Non-GET requests get an `X-RequestDigest` header unless the caller
    /// already supplied one or an `Authorization` header.
    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let mut headers = self.config.headers.clone();
        headers.merge(&options.headers);
        headers.set_if_missing(ODataConfig::HEADER_ACCEPT, ODataConfig::ACCEPT_JSON);
        headers.set_if_missing(
            ODataConfig::HEADER_CONTENT_TYPE,
            ODataConfig::CONTENT_TYPE_VERBOSE,
        );
        headers.set_if_missing(ODataConfig::HEADER_CLIENT_TAG, NetworkConfig::CLIENT_TAG);
        headers.set_if_missing(ODataConfig::HEADER_USER_AGENT, NetworkConfig::USER_AGENT);

        if method != Method::GET
            && !headers.contains(ODataConfig::HEADER_DIGEST)
            && !headers.contains(ODataConfig::HEADER_AUTHORIZATION)
        {
            let digest = self.get_digest(url).await?;
            headers.set(ODataConfig::HEADER_DIGEST, digest);
        }

        debug!("{} {}", method, url);
        let request = HttpRequest::new(method, url)
            .with_headers(headers)
            .with_body(options.body);
        self.transport.send(request).await
    }

    /// Send a fully prepared request, skipping header processing.
    pub async fn fetch_raw(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.send(request).await
    }

    /// Form digest for the web that owns `url`.
    pub async fn get_digest(&self, url: &str) -> Result<String> {
        let web_url = DigestCache::web_url_of(url)?;
        self.digests.get_digest(&web_url).await
    }
}
