//! The host-supplied "send one request" primitive.
//!
//! Everything above this layer (retry, digest, batching) is written against
//! [`HttpTransport`]. [`ReqwestTransport`] is the bundled adapter; hosts with
//! their own HTTP stack implement the trait directly.

use super::http::{Headers, HttpRequest, HttpResponse};
use crate::config::NetworkConfig;
use crate::{Result, SpRestError};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sends exactly one HTTP request, with no retry and no status handling.
///
/// Implementations must return non-2xx responses as `Ok`; classifying them is
/// the retry transport's job.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Shared transport handle.
pub type DynTransport = Arc<dyn HttpTransport>;

/// [`HttpTransport`] backed by a reqwest client.
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| SpRestError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self { client, timeout })
    }

    /// Wrap an existing reqwest client (proxy, TLS and pool settings are kept).
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method.clone();
        let url = request.url.clone();

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SpRestError::Timeout(self.timeout)
            } else {
                SpRestError::Network {
                    message: format!("{} {} failed: {}", method, url, e),
                    cause: std::error::Error::source(&e).map(|s| s.to_string()),
                }
            }
        })?;

        let status = response.status();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!("{} {} -> {} ({} bytes)", method, url, status.as_u16(), body.len());

        Ok(HttpResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
        )
        .with_headers(headers)
        .with_body(body))
    }
}
