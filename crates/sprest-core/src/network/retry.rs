//! Backoff for throttled and unavailable responses.
//!
//! [`RetryTransport`] sends a request and looks at the status: 2xx is done,
//! 429 and 503 are tried again after a doubling pause, anything else is
//! surfaced on the attempt that produced it. The loop itself lives in
//! [`retry_async`], which only knows about [`Attempt`] outcomes.

use super::http::{HttpRequest, HttpResponse};
use super::transport::DynTransport;
use crate::config::NetworkConfig;
use crate::{Result, SpRestError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts in total, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    /// Pause before the first retry; doubled for every retry after it.
    pub base_delay: Duration,
    /// No pause is longer than this.
    pub max_delay: Duration,
    /// Shorten each pause to a random point in its upper half.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::RETRY_MAX_ATTEMPTS,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pauses between attempts, in order. Yields one item fewer than
    /// `max_attempts`.
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            retries: 0,
        }
    }

    /// Pause before retry number `retry` (0 is the first retry).
    fn pause(&self, retry: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        if self.jitter && !doubled.is_zero() {
            rand::rng().random_range(doubled / 2..=doubled)
        } else {
            doubled
        }
    }
}

/// Iterator over the pauses a [`RetryConfig`] allows.
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.max_attempts.max(1) {
            return None;
        }
        let pause = self.config.pause(self.retries);
        self.retries += 1;
        Some(pause)
    }
}

/// Outcome of one try.
pub enum Attempt<T, E> {
    /// Final; returned to the caller as is.
    Done(std::result::Result<T, E>),
    /// Transient failure; try again while the backoff allows it.
    Retry(E),
}

/// Attempts made and time spent pausing between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Run `operation` until it is done or the backoff runs out.
///
/// When the last allowed attempt still asks for a retry its error is
/// returned.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> (std::result::Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut backoff = config.backoff();

    loop {
        stats.attempts += 1;
        let error = match operation().await {
            Attempt::Done(result) => return (result, stats),
            Attempt::Retry(error) => error,
        };

        let Some(pause) = backoff.next() else {
            warn!("Giving up after {} attempts: {}", stats.attempts, error);
            return (Err(error), stats);
        };
        warn!(
            "Attempt {} failed: {}. Trying again in {:?}",
            stats.attempts, error, pause
        );
        stats.total_delay += pause;
        tokio::time::sleep(pause).await;
    }
}

/// Wraps a transport with backoff on 429/503.
pub struct RetryTransport {
    transport: DynTransport,
    config: RetryConfig,
}

impl RetryTransport {
    pub fn new(transport: DynTransport, config: RetryConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Send `request`, retrying throttled and unavailable responses.
    ///
    /// A 2xx response is returned as `Ok`. Any other status becomes an
    /// [`SpRestError::Http`] carrying the response.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_with_stats(request).await.0
    }

    /// Like [`send`](Self::send), also reporting attempts and accumulated delay.
    pub async fn send_with_stats(&self, request: HttpRequest) -> (Result<HttpResponse>, RetryStats) {
        retry_async(&self.config, || {
            let request = request.clone();
            let (method, url) = (request.method.clone(), request.url.clone());
            async move {
                let response = match self.transport.send_once(request).await {
                    Ok(response) => response,
                    // connection level failures are not retried
                    Err(e) => return Attempt::Done(Err(e)),
                };
                if response.is_success() {
                    return Attempt::Done(Ok(response));
                }
                debug!("{} {} answered {}", method, url, response.status());
                let error = SpRestError::from_response(response);
                if error.is_retryable() {
                    Attempt::Retry(error)
                } else {
                    Attempt::Done(Err(error))
                }
            }
        })
        .await
    }
}
