//! Per-request state threaded through the pipeline stages.

use crate::batch::{Batch, DependencyGate};
use crate::cache::{CachingParser, ClientStorage, ResolvedCaching};
use crate::network::{HttpResponse, RequestOptions, SpHttpClient};
use crate::parsers::ResponseParser;
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The caller's parser, possibly wrapped so results land in the cache.
pub enum PipelineParser<P> {
    Plain(P),
    Caching(CachingParser<P>),
}

#[async_trait]
impl<P: ResponseParser> ResponseParser for PipelineParser<P> {
    type Output = P::Output;

    async fn parse(&self, response: HttpResponse) -> Result<P::Output> {
        match self {
            PipelineParser::Plain(parser) => parser.parse(response).await,
            PipelineParser::Caching(parser) => parser.parse(response).await,
        }
    }

    fn hydrate(&self, value: Value) -> Result<P::Output> {
        match self {
            PipelineParser::Plain(parser) => parser.hydrate(value),
            PipelineParser::Caching(parser) => parser.hydrate(value),
        }
    }
}

/// What a request produced so far.
pub enum Outcome<T> {
    /// Already known (cache hit).
    Ready(T),
    /// Settles later: a batch slot or a deferred network call.
    Deferred(BoxFuture<'static, Result<T>>),
}

/// Future returned for every issued request.
#[must_use = "a request handle does nothing unless awaited"]
pub struct RequestHandle<T> {
    inner: BoxFuture<'static, Result<T>>,
}

impl<T: Send + 'static> RequestHandle<T> {
    pub(crate) fn from_outcome(outcome: Outcome<T>) -> Self {
        let inner = match outcome {
            Outcome::Ready(value) => Box::pin(futures::future::ready(Ok(value))),
            Outcome::Deferred(future) => future,
        };
        Self { inner }
    }
}

impl<T> Future for RequestHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// One logical operation on its way through the pipeline.
pub struct RequestContext<P: ResponseParser> {
    pub request_id: String,
    pub method: Method,
    /// Absolute url with query, or batch-relative when batched.
    pub url: String,
    pub options: RequestOptions,
    pub caching: Option<ResolvedCaching>,
    pub batch: Option<Batch>,
    pub(crate) parser: Option<PipelineParser<P>>,
    pub(crate) gate: Option<DependencyGate>,
    pub(crate) client: Arc<SpHttpClient>,
    pub(crate) storage: ClientStorage,
    pub(crate) outcome: Option<Outcome<P::Output>>,
    pub(crate) handle: Option<RequestHandle<P::Output>>,
}

impl<P: ResponseParser> RequestContext<P> {
    pub fn has_result(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    /// Let the bound batch proceed past this request.
    pub(crate) fn release_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release();
        }
    }
}
