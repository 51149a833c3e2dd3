//! Network layer: wire types, the host transport seam, retries and form
//! digests.
//!
//! This module provides:
//! - Ordered, case-insensitive headers and buffered request/response types
//! - The `HttpTransport` trait and a reqwest-backed implementation
//! - Retry with exponential backoff on throttling
//! - A per-web form digest cache
//! - `SpHttpClient`, which ties the above together

mod client;
mod digest;
mod http;
mod retry;
mod transport;

pub use client::SpHttpClient;
pub use digest::{CachedDigest, DigestCache};
pub use http::{Headers, HttpRequest, HttpResponse, RequestOptions};
pub use retry::{retry_async, Attempt, Backoff, RetryConfig, RetryStats, RetryTransport};
pub use transport::{DynTransport, HttpTransport, ReqwestTransport};
