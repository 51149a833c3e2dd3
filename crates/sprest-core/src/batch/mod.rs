//! Batch engine.
//!
//! A [`Batch`] collects operations and sends them as one multipart `$batch`
//! request. Operations are answered in the order they were added. Writes are
//! grouped into change sets at serialization time.
//!
//! Execution waits until every [`DependencyGate`] handed out by the batch has
//! been released, including gates registered while it was already waiting.

mod parse;
mod serialize;

pub use parse::parse_batch_response;
pub use serialize::{serialize_batch, BatchPart};

use crate::address::{combine_paths, is_url_absolute};
use crate::config::ODataConfig;
use crate::network::{HttpResponse, RequestOptions, SpHttpClient};
use crate::parsers::ResponseParser;
use crate::{Result, SpRestError};
use futures::future::{join_all, BoxFuture};
use reqwest::Method;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a batch. Operations can only be added before serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BatchPhase {
    Accumulating,
    AwaitingDependencies,
    Serializing,
    Sent,
    Resolved,
}

type Resolver = Box<dyn FnOnce(Result<HttpResponse>) -> BoxFuture<'static, ()> + Send>;

struct PendingOperation {
    url: String,
    method: Method,
    options: RequestOptions,
    resolver: Resolver,
}

struct BatchState {
    phase: BatchPhase,
    operations: Vec<PendingOperation>,
    gates: Vec<oneshot::Receiver<()>>,
}

struct BatchInner {
    batch_id: String,
    base_url: String,
    client: Arc<SpHttpClient>,
    state: Mutex<BatchState>,
}

/// Handle to a batch. Clones share the same queue.
#[derive(Clone)]
pub struct Batch {
    inner: Arc<BatchInner>,
}

impl Batch {
    pub fn new(base_url: impl Into<String>, client: Arc<SpHttpClient>) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                batch_id: Uuid::new_v4().to_string(),
                base_url: base_url.into(),
                client,
                state: Mutex::new(BatchState {
                    phase: BatchPhase::Accumulating,
                    operations: Vec::new(),
                    gates: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.batch_id
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn phase(&self) -> BatchPhase {
        self.lock().phase
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: BatchPhase) {
        self.lock().phase = phase;
    }

    /// Queue an operation. Nothing is sent until [`execute`](Self::execute).
    ///
    /// `url` may be relative to the batch's base url.
    pub fn add<P: ResponseParser>(
        &self,
        url: impl Into<String>,
        method: Method,
        options: RequestOptions,
        parser: P,
    ) -> Result<Pending<P::Output>> {
        let (tx, rx) = oneshot::channel();
        let resolver: Resolver = Box::new(move |result: Result<HttpResponse>| {
            Box::pin(async move {
                let outcome = match result {
                    Ok(response) => parser.parse(response).await,
                    Err(e) => Err(e),
                };
                // the caller may have dropped its handle
                let _ = tx.send(outcome);
            })
        });

        let url = url.into();
        let mut state = self.lock();
        if state.phase > BatchPhase::AwaitingDependencies {
            return Err(SpRestError::BatchClosed {
                batch_id: self.inner.batch_id.clone(),
            });
        }
        debug!(
            "[{}] Queued {} {} as operation {}",
            self.inner.batch_id,
            method,
            url,
            state.operations.len()
        );
        state.operations.push(PendingOperation {
            url,
            method,
            options,
            resolver,
        });

        Ok(Pending {
            rx,
            batch_id: self.inner.batch_id.clone(),
        })
    }

    /// Register a gate that holds back execution until it is released.
    ///
    /// Once the batch has started serializing the returned gate holds
    /// nothing.
    pub fn add_dependency(&self) -> DependencyGate {
        let mut state = self.lock();
        if state.phase > BatchPhase::AwaitingDependencies {
            return DependencyGate { tx: None };
        }
        let (tx, rx) = oneshot::channel();
        state.gates.push(rx);
        DependencyGate { tx: Some(tx) }
    }

    /// Send every queued operation and settle their handles.
    ///
    /// Returns an error when the batch as a whole failed; in that case every
    /// operation has been rejected with [`SpRestError::BatchFailed`]. Errors
    /// of individual parts are delivered only to their own handle.
    pub async fn execute(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.phase != BatchPhase::Accumulating {
                return Err(SpRestError::BatchClosed {
                    batch_id: self.inner.batch_id.clone(),
                });
            }
            state.phase = BatchPhase::AwaitingDependencies;
        }

        // the phase flips under the same guard that finds no gates left
        let operations = loop {
            let gates = {
                let mut state = self.lock();
                if state.gates.is_empty() {
                    state.phase = BatchPhase::Serializing;
                    break std::mem::take(&mut state.operations);
                }
                std::mem::take(&mut state.gates)
            };
            debug!(
                "[{}] Waiting on {} dependencies",
                self.inner.batch_id,
                gates.len()
            );
            join_all(gates).await;
        };

        if operations.is_empty() {
            debug!("[{}] No requests to send", self.inner.batch_id);
            self.set_phase(BatchPhase::Resolved);
            return Ok(());
        }

        info!(
            "[{}] Executing batch with {} requests",
            self.inner.batch_id,
            operations.len()
        );

        let expected = operations.len();
        let prepared = self.prepare(&operations);
        let sent = match prepared {
            Ok((url, options)) => self.send(url, options, expected).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(responses) => {
                for (operation, response) in operations.into_iter().zip(responses) {
                    (operation.resolver)(Ok(response)).await;
                }
                self.set_phase(BatchPhase::Resolved);
                debug!("[{}] Batch resolved", self.inner.batch_id);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] Batch failed: {}", self.inner.batch_id, e);
                for operation in operations {
                    (operation.resolver)(Err(SpRestError::BatchFailed {
                        batch_id: self.inner.batch_id.clone(),
                        message: e.to_string(),
                    }))
                    .await;
                }
                self.set_phase(BatchPhase::Resolved);
                Err(e)
            }
        }
    }

    fn absolute_base_url(&self) -> Result<String> {
        let base = &self.inner.base_url;
        if is_url_absolute(base) {
            return Ok(base.clone());
        }
        match &self.inner.client.config().base_url {
            Some(configured) if is_url_absolute(configured) => {
                Ok(combine_paths(&[configured.as_str(), base.as_str()]))
            }
            _ => Err(SpRestError::Config {
                message: format!(
                    "Batch base url '{}' is relative and no absolute base_url is configured",
                    base
                ),
            }),
        }
    }

    /// Serialize the queued operations into the outer `$batch` request.
    fn prepare(&self, operations: &[PendingOperation]) -> Result<(String, RequestOptions)> {
        let batch_id = &self.inner.batch_id;
        let base_url = self.absolute_base_url()?;

        let parts: Vec<BatchPart<'_>> = operations
            .iter()
            .map(|op| BatchPart {
                method: &op.method,
                url: &op.url,
                options: &op.options,
            })
            .collect();
        let body = serialize_batch(
            batch_id,
            &base_url,
            &parts,
            &self.inner.client.config().headers,
            || Uuid::new_v4().to_string(),
        );

        let options = RequestOptions::new()
            .with_header(
                ODataConfig::HEADER_CONTENT_TYPE,
                format!("multipart/mixed; boundary=batch_{}", batch_id),
            )
            .with_body(body);
        let url = combine_paths(&[base_url.as_str(), ODataConfig::BATCH_PATH]);
        Ok((url, options))
    }

    async fn send(
        &self,
        url: String,
        options: RequestOptions,
        expected: usize,
    ) -> Result<Vec<HttpResponse>> {
        self.set_phase(BatchPhase::Sent);
        let response = self
            .inner
            .client
            .fetch(&url, Method::POST, options)
            .await?;

        let responses = parse_batch_response(&response.text()?)?;
        if responses.len() != expected {
            return Err(SpRestError::BatchParse {
                message: format!(
                    "Could not properly parse responses to match requests in batch: {} responses for {} requests",
                    responses.len(),
                    expected
                ),
            });
        }
        Ok(responses)
    }
}

/// Result of a batched operation; settles when the batch executes.
///
/// Dropping the handle does not remove the operation from the batch.
#[must_use = "a pending batch result does nothing unless awaited"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
    batch_id: String,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SpRestError::BatchFailed {
                batch_id: self.batch_id.clone(),
                message: "batch was dropped before it executed".into(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Holds a batch back until released. Dropping the gate releases it.
#[derive(Debug)]
pub struct DependencyGate {
    tx: Option<oneshot::Sender<()>>,
}

impl DependencyGate {
    /// Whether this gate is still holding its batch back.
    pub fn is_holding(&self) -> bool {
        self.tx.is_some()
    }

    pub fn release(mut self) {
        self.open();
    }

    fn open(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for DependencyGate {
    fn drop(&mut self) {
        self.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::network::{CachedDigest, HttpRequest, HttpTransport};
    use crate::parsers::{ODataDefaultParser, TextParser};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WEB: &str = "https://contoso.sharepoint.com/sites/dev";

    /// Answers `$batch` with one part per request line in the body, echoing
    /// the request url.
    #[derive(Default)]
    struct EchoBatchTransport {
        batch_calls: AtomicUsize,
        last_body: Mutex<Option<String>>,
        /// Drop this many parts from the response.
        truncate: usize,
    }

    #[async_trait]
    impl HttpTransport for EchoBatchTransport {
        async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let body = request.body.clone().unwrap_or_default();
            *self.last_body.lock().unwrap() = Some(body.clone());

            let mut out = String::new();
            let request_lines: Vec<&str> =
                body.lines().filter(|l| l.ends_with(" HTTP/1.1")).collect();
            let keep = request_lines.len().saturating_sub(self.truncate);
            for line in request_lines.into_iter().take(keep) {
                let url = line.split(' ').nth(1).unwrap_or_default();
                let (status, payload) = if url.ends_with("/missing") {
                    ("404 Not Found", json!({"error": "missing"}))
                } else {
                    ("200 OK", json!({"d": {"url": url}}))
                };
                out.push_str(&format!(
                    "--batchresponse_x\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 {}\r\n\r\n{}\r\n",
                    status, payload
                ));
            }
            out.push_str("--batchresponse_x--\r\n");
            Ok(HttpResponse::from_status(200).with_body(out))
        }
    }

    async fn batch_with(transport: Arc<EchoBatchTransport>) -> Batch {
        let client = Arc::new(SpHttpClient::new(
            transport,
            Arc::new(RuntimeConfig::default()),
        ));
        client
            .digests()
            .insert(
                &format!("{}/", WEB),
                CachedDigest::new("0x1", chrono::Utc::now() + chrono::Duration::minutes(10)),
            )
            .await;
        Batch::new(WEB, client)
    }

    fn url_of(value: &Value) -> &str {
        value["url"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_responses_match_submission_order() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport.clone()).await;

        let a = batch
            .add("_api/web/a", Method::GET, RequestOptions::new(), ODataDefaultParser::<Value>::new())
            .unwrap();
        let b = batch
            .add("_api/web/b", Method::POST, RequestOptions::new(), ODataDefaultParser::<Value>::new())
            .unwrap();
        let c = batch
            .add("_api/web/c", Method::GET, RequestOptions::new(), ODataDefaultParser::<Value>::new())
            .unwrap();

        batch.execute().await.unwrap();

        assert_eq!(url_of(&a.await.unwrap()), format!("{}/_api/web/a", WEB));
        assert_eq!(url_of(&b.await.unwrap()), format!("{}/_api/web/b", WEB));
        assert_eq!(url_of(&c.await.unwrap()), format!("{}/_api/web/c", WEB));
        assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.phase(), BatchPhase::Resolved);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport.clone()).await;

        batch.execute().await.unwrap();

        assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(batch.phase(), BatchPhase::Resolved);
    }

    #[tokio::test]
    async fn test_count_mismatch_rejects_every_operation() {
        let transport = Arc::new(EchoBatchTransport {
            truncate: 1,
            ..Default::default()
        });
        let batch = batch_with(transport).await;
        let a = batch
            .add("_api/web/a", Method::GET, RequestOptions::new(), TextParser)
            .unwrap();
        let b = batch
            .add("_api/web/b", Method::GET, RequestOptions::new(), TextParser)
            .unwrap();

        let err = batch.execute().await.unwrap_err();

        assert!(matches!(err, SpRestError::BatchParse { .. }));
        assert!(matches!(a.await, Err(SpRestError::BatchFailed { .. })));
        assert!(matches!(b.await, Err(SpRestError::BatchFailed { .. })));
    }

    #[tokio::test]
    async fn test_part_error_only_rejects_its_operation() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport).await;
        let ok = batch
            .add("_api/web/a", Method::GET, RequestOptions::new(), ODataDefaultParser::<Value>::new())
            .unwrap();
        let missing = batch
            .add("_api/web/missing", Method::GET, RequestOptions::new(), ODataDefaultParser::<Value>::new())
            .unwrap();

        batch.execute().await.unwrap();

        assert!(ok.await.is_ok());
        assert_eq!(missing.await.unwrap_err().status(), Some(404));
    }

    #[tokio::test]
    async fn test_add_after_execute_is_rejected() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport).await;
        batch.execute().await.unwrap();

        let err = batch
            .add("_api/web", Method::GET, RequestOptions::new(), TextParser)
            .err()
            .unwrap();
        assert!(matches!(err, SpRestError::BatchClosed { .. }));
        assert!(matches!(
            batch.execute().await,
            Err(SpRestError::BatchClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_waits_for_dependencies() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport.clone()).await;
        let gate = batch.add_dependency();

        let runner = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.execute().await })
        };
        while batch.phase() != BatchPhase::AwaitingDependencies {
            tokio::task::yield_now().await;
        }

        // still accepting work while waiting
        let late = batch
            .add("_api/web/late", Method::GET, RequestOptions::new(), TextParser)
            .unwrap();
        // a gate added while waiting holds the batch too
        let second = batch.add_dependency();
        gate.release();
        tokio::task::yield_now().await;
        assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 0);

        drop(second);
        runner.await.unwrap().unwrap();
        assert!(late.await.unwrap().contains("/_api/web/late"));
        assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_after_serializing_holds_nothing() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport).await;
        assert!(batch.add_dependency().is_holding());

        let waiting = batch.add_dependency();
        let runner = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.execute().await })
        };
        while batch.phase() != BatchPhase::AwaitingDependencies {
            tokio::task::yield_now().await;
        }
        assert!(batch.add_dependency().is_holding());
        drop(waiting);
        runner.await.unwrap().unwrap();

        assert!(!batch.add_dependency().is_holding());
        assert!(batch.lock().gates.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gate_racing_execute_is_honored() {
        for _ in 0..200 {
            let transport = Arc::new(EchoBatchTransport::default());
            let batch = batch_with(transport.clone()).await;
            let pending = batch
                .add("_api/web", Method::GET, RequestOptions::new(), TextParser)
                .unwrap();

            let runner = {
                let batch = batch.clone();
                tokio::spawn(async move { batch.execute().await })
            };
            let gate = batch.add_dependency();
            if gate.is_holding() {
                tokio::task::yield_now().await;
                assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 0);
            }
            gate.release();

            runner.await.unwrap().unwrap();
            assert!(pending.await.is_ok());
            assert_eq!(transport.batch_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_relative_base_without_config_fails() {
        let client = Arc::new(SpHttpClient::new(
            Arc::new(EchoBatchTransport::default()),
            Arc::new(RuntimeConfig::default()),
        ));
        let batch = Batch::new("sites/dev", client);
        let pending = batch
            .add("_api/web", Method::GET, RequestOptions::new(), TextParser)
            .unwrap();

        assert!(matches!(
            batch.execute().await,
            Err(SpRestError::Config { .. })
        ));
        assert!(matches!(pending.await, Err(SpRestError::BatchFailed { .. })));
    }

    #[tokio::test]
    async fn test_dropped_batch_rejects_pending() {
        let transport = Arc::new(EchoBatchTransport::default());
        let batch = batch_with(transport).await;
        let pending = batch
            .add("_api/web", Method::GET, RequestOptions::new(), TextParser)
            .unwrap();
        drop(batch);

        assert!(matches!(pending.await, Err(SpRestError::BatchFailed { .. })));
    }
}
