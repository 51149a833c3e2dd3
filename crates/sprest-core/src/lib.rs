//! sprest core - request execution for SharePoint-style OData REST APIs.
//!
//! This crate turns logical operations (get a list, update an item) into HTTP
//! requests. It provides:
//! - Resource addressing with OData query options
//! - Multipart `$batch` requests with change-set grouping
//! - Retry with exponential backoff on throttling (429) and unavailability (503)
//! - A per-web form digest cache for write requests
//! - Optional response caching in a session or local (SQLite) store
//!
//! There is no resource model here: callers build addresses and pick a
//! response parser.
//!
//! # Example
//!
//! ```rust,ignore
//! use sprest_core::{CachingOptions, ODataDefaultParser, ResourceAddress, RuntimeConfig, SpRestClient};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> sprest_core::Result<()> {
//!     let config = RuntimeConfig::new().with_base_url("https://contoso.sharepoint.com/sites/dev");
//!     let client = SpRestClient::new(config)?;
//!
//!     // One cached GET
//!     let lists = ResourceAddress::parse("_api/web/lists").select(&["Title"]).top(10);
//!     let value: Value = client
//!         .request(&lists, ODataDefaultParser::<Value>::new())
//!         .using_caching(CachingOptions::new())
//!         .issue()?
//!         .await?;
//!     println!("{}", value);
//!
//!     // Two GETs in one round trip
//!     let batch = client.create_batch("https://contoso.sharepoint.com/sites/dev");
//!     let web = client
//!         .request(&ResourceAddress::parse("_api/web"), ODataDefaultParser::<Value>::new())
//!         .in_batch(&batch)?
//!         .issue()?;
//!     let user = client
//!         .request(&ResourceAddress::parse("_api/web/currentuser"), ODataDefaultParser::<Value>::new())
//!         .in_batch(&batch)?
//!         .issue()?;
//!     batch.execute().await?;
//!     println!("{} {}", web.await?, user.await?);
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod network;
pub mod parsers;
pub mod pipeline;

mod client;

// Re-export commonly used types
pub use address::{combine_paths, is_url_absolute, QueryParams, ResourceAddress};
pub use batch::{Batch, BatchPhase, DependencyGate, Pending};
pub use cache::{
    CacheEntry, CacheStore, CachingOptions, ClientStorage, ClientStore, MemoryStore, SqliteStore,
    UnavailableStore,
};
pub use config::{RuntimeConfig, StoreKind};
pub use error::{Result, SpRestError};
pub use network::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestOptions, RetryConfig,
    SpHttpClient,
};
pub use parsers::{BufferParser, JsonParser, ODataDefaultParser, ResponseParser, TextParser};
pub use pipeline::{PreparedRequest, RequestHandle};

pub use client::{SpRestClient, SpRestClientBuilder};
