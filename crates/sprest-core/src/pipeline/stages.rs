//! The pipeline stages, in execution order.

use super::context::{Outcome, PipelineParser, RequestContext, RequestHandle};
use crate::cache::CachingParser;
use crate::parsers::ResponseParser;
use crate::{Result, SpRestError};
use reqwest::Method;
use tracing::{debug, info, warn};

/// A pipeline stage. Stages run synchronously; network work is deferred into
/// the context's outcome.
pub type Stage<P> = fn(&mut RequestContext<P>) -> Result<()>;

/// Stages every request runs through.
pub fn default_stages<P: ResponseParser>() -> [Stage<P>; 5] {
    [log_start, caching, send, log_end, return_result]
}

pub fn log_start<P: ResponseParser>(ctx: &mut RequestContext<P>) -> Result<()> {
    match &ctx.batch {
        Some(batch) => info!(
            "[{}] ({}) Beginning {} request ({})",
            ctx.request_id,
            batch.id(),
            ctx.method,
            ctx.url
        ),
        None => info!(
            "[{}] Beginning {} request ({})",
            ctx.request_id, ctx.method, ctx.url
        ),
    }
    Ok(())
}

/// Serve GETs from the cache, or arrange for the response to be cached.
pub fn caching<P: ResponseParser>(ctx: &mut RequestContext<P>) -> Result<()> {
    if ctx.has_result() || ctx.method != Method::GET {
        return Ok(());
    }
    let Some(caching) = ctx.caching.clone() else {
        return Ok(());
    };
    let store = ctx.storage.store(caching.store).clone();
    if !store.enabled() {
        debug!(
            "[{}] {} store unavailable, skipping cache",
            ctx.request_id, caching.store
        );
        return Ok(());
    }

    if let Some(value) = store.get_value(&caching.key) {
        let hydrated = match &ctx.parser {
            Some(parser) => parser.hydrate(value),
            None => Err(SpRestError::Other("request has no parser".into())),
        };
        match hydrated {
            Ok(result) => {
                info!("[{}] Value returned from cache", ctx.request_id);
                ctx.release_gate();
                ctx.outcome = Some(Outcome::Ready(result));
                return Ok(());
            }
            Err(e) => warn!(
                "[{}] Ignoring cached value for {}: {}",
                ctx.request_id, caching.key, e
            ),
        }
    }

    ctx.parser = match ctx.parser.take() {
        Some(PipelineParser::Plain(parser)) => Some(PipelineParser::Caching(CachingParser::new(
            parser, store, caching,
        ))),
        other => other,
    };
    Ok(())
}

/// Queue into the bound batch, or defer a direct network call.
pub fn send<P: ResponseParser>(ctx: &mut RequestContext<P>) -> Result<()> {
    if ctx.has_result() {
        return Ok(());
    }
    let parser = ctx
        .parser
        .take()
        .ok_or_else(|| SpRestError::Other("request has no parser".into()))?;

    match ctx.batch.clone() {
        Some(batch) => {
            debug!(
                "[{}] ({}) Adding request to batch",
                ctx.request_id,
                batch.id()
            );
            let pending = batch.add(
                ctx.url.clone(),
                ctx.method.clone(),
                ctx.options.clone(),
                parser,
            )?;
            ctx.release_gate();
            ctx.outcome = Some(Outcome::Deferred(Box::pin(pending)));
        }
        None => {
            debug!("[{}] Sending request", ctx.request_id);
            let client = ctx.client.clone();
            let url = ctx.url.clone();
            let method = ctx.method.clone();
            let options = ctx.options.clone();
            ctx.outcome = Some(Outcome::Deferred(Box::pin(async move {
                let response = client.fetch(&url, method, options).await?;
                parser.parse(response).await
            })));
        }
    }
    Ok(())
}

/// Log completion once the outcome settles.
pub fn log_end<P: ResponseParser>(ctx: &mut RequestContext<P>) -> Result<()> {
    let request_id = ctx.request_id.clone();
    let method = ctx.method.clone();
    let url = ctx.url.clone();

    ctx.outcome = match ctx.outcome.take() {
        Some(Outcome::Deferred(future)) => Some(Outcome::Deferred(Box::pin(async move {
            let result = future.await;
            match &result {
                Ok(_) => info!("[{}] Completed {} request ({})", request_id, method, url),
                Err(e) => warn!(
                    "[{}] {} request failed ({}): {}",
                    request_id, method, url, e
                ),
            }
            result
        }))),
        Some(ready) => {
            debug!("[{}] Completed {} request ({})", request_id, method, url);
            Some(ready)
        }
        None => None,
    };
    Ok(())
}

pub fn return_result<P: ResponseParser>(ctx: &mut RequestContext<P>) -> Result<()> {
    let outcome = ctx
        .outcome
        .take()
        .ok_or_else(|| SpRestError::Other("request pipeline produced no result".into()))?;
    ctx.handle = Some(RequestHandle::from_outcome(outcome));
    Ok(())
}
