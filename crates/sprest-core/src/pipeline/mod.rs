//! Request pipeline.
//!
//! Every operation is turned into a [`RequestContext`] and pushed through a
//! fixed list of stages: `log_start`, `caching`, `send`, `log_end`,
//! `return_result`. A cache hit short-circuits `send`. Batched requests are
//! queued when issued, so their order in the batch is the order in which
//! they were issued.

mod context;
mod stages;

pub use context::{Outcome, PipelineParser, RequestContext, RequestHandle};
pub use stages::{default_stages, Stage};

use crate::address::{combine_paths, ResourceAddress};
use crate::batch::Batch;
use crate::cache::{CachingOptions, ClientStorage};
use crate::network::{RequestOptions, SpHttpClient};
use crate::parsers::ResponseParser;
use crate::{Result, SpRestError};
use reqwest::Method;
use std::sync::Arc;
use uuid::Uuid;

/// Shared collaborators every request needs.
#[derive(Clone)]
pub struct Pipeline {
    client: Arc<SpHttpClient>,
    storage: ClientStorage,
}

impl Pipeline {
    pub fn new(client: Arc<SpHttpClient>, storage: ClientStorage) -> Self {
        Self { client, storage }
    }

    pub fn client(&self) -> &Arc<SpHttpClient> {
        &self.client
    }

    pub fn storage(&self) -> &ClientStorage {
        &self.storage
    }

    /// Start building a GET request against `address`.
    pub fn request<P: ResponseParser>(
        &self,
        address: &ResourceAddress,
        parser: P,
    ) -> PreparedRequest<P> {
        PreparedRequest {
            pipeline: self.clone(),
            url: address.to_url_and_query(),
            method: Method::GET,
            options: RequestOptions::new(),
            parser,
            caching: None,
            batch: None,
        }
    }

    fn resolve_url(&self, url: String, batched: bool) -> Result<String> {
        if crate::address::is_url_absolute(&url) || batched {
            return Ok(url);
        }
        match &self.client.config().base_url {
            Some(base) => Ok(combine_paths(&[base.as_str(), url.as_str()])),
            None => Err(SpRestError::Config {
                message: format!(
                    "Cannot resolve relative url '{}' without a configured base_url",
                    url
                ),
            }),
        }
    }

    /// Run `ctx` through `stages` and hand back its result handle.
    pub fn run<P: ResponseParser>(
        &self,
        mut ctx: RequestContext<P>,
        stages: &[Stage<P>],
    ) -> Result<RequestHandle<P::Output>> {
        for stage in stages {
            stage(&mut ctx)?;
        }
        ctx.handle
            .take()
            .ok_or_else(|| SpRestError::Other("request pipeline produced no result".into()))
    }
}

/// Builder for a single request. Consumed by [`issue`](Self::issue).
pub struct PreparedRequest<P> {
    pipeline: Pipeline,
    url: String,
    method: Method,
    options: RequestOptions,
    parser: P,
    caching: Option<CachingOptions>,
    batch: Option<Batch>,
}

impl<P: ResponseParser> PreparedRequest<P> {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Cache the response of this request (GET only).
    ///
    /// Does nothing when caching is globally disabled.
    pub fn using_caching(mut self, options: CachingOptions) -> Self {
        if !self.pipeline.client.config().global_cache_disable {
            self.caching = Some(options);
        }
        self
    }

    /// Send this request as part of `batch`.
    pub fn in_batch(mut self, batch: &Batch) -> Result<Self> {
        if self.batch.is_some() {
            return Err(SpRestError::AlreadyInBatch);
        }
        self.batch = Some(batch.clone());
        Ok(self)
    }

    /// Issue the request.
    ///
    /// A batched request is queued immediately; its handle settles when the
    /// batch executes. An unbatched request is sent when its handle is first
    /// polled.
    pub fn issue(self) -> Result<RequestHandle<P::Output>> {
        let pipeline = self.pipeline;
        let url = pipeline.resolve_url(self.url, self.batch.is_some())?;
        let config = pipeline.client.config();
        // batch-relative urls are keyed by their absolute form
        let cache_url = match &self.batch {
            Some(batch) if !crate::address::is_url_absolute(&url) => {
                combine_paths(&[batch.base_url(), url.as_str()])
            }
            _ => url.clone(),
        };
        let caching = self
            .caching
            .filter(|_| !config.global_cache_disable)
            .map(|c| c.resolve(&cache_url, config));
        // registered before any stage runs so the batch cannot start without us
        let gate = self.batch.as_ref().map(|b| b.add_dependency());

        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            method: self.method,
            url,
            options: self.options,
            caching,
            batch: self.batch,
            parser: Some(PipelineParser::Plain(self.parser)),
            gate,
            client: pipeline.client.clone(),
            storage: pipeline.storage.clone(),
            outcome: None,
            handle: None,
        };

        pipeline.run(ctx, &default_stages::<P>())
    }
}
