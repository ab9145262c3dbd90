//! Asynchronous request execution.
//!
//! # Design
//! `Transport` is the black-box HTTP client: a blocking "execute this
//! request" call. `HttpManager` owns a tokio worker pool and runs each
//! submitted request on it, so `submit` returns immediately and the
//! completion callback fires later on a worker thread.
//!
//! Transport calls run on the runtime's blocking pool, which is capped at
//! `worker_threads`; further submissions queue until a thread frees up.
//!
//! Every submission yields a `Call` handle. A call is `Pending` until the
//! transport returns, then `Executed`; `cancel` only has an effect while
//! it is still pending. Once cancelled, the completion callback never runs.
//!
//! Only HTTP 200 counts as a successful response. Any other status is
//! reported through the callback as `PipelineError::Protocol`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::HttpConfig;
use crate::error::{PipelineError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// A blocking HTTP client.
///
/// Implementations run on worker threads and must return transport
/// failures as `PipelineError::Transport`.
pub trait Transport: Send + Sync + 'static {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// `Transport` backed by a ureq agent configured from `HttpConfig`.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &HttpConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(config.connect_timeout()))
            .timeout_send_request(Some(config.write_timeout()))
            .timeout_send_body(Some(config.write_timeout()))
            .timeout_recv_response(Some(config.read_timeout()))
            .timeout_recv_body(Some(config.read_timeout()))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = request.url.as_str();
        let body = request.body.as_ref().map(|body| body.to_wire());

        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), &request.headers).call(),
            HttpMethod::Head => with_headers(self.agent.head(url), &request.headers).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), &request.headers).call(),
            HttpMethod::Post => send_with_body(self.agent.post(url), &request.headers, body.as_deref()),
            HttpMethod::Put => send_with_body(self.agent.put(url), &request.headers, body.as_deref()),
            HttpMethod::Patch => send_with_body(self.agent.patch(url), &request.headers, body.as_deref()),
        };
        let mut response = result.map_err(|err| PipelineError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = if request.method == HttpMethod::Head {
            String::new()
        } else {
            response
                .body_mut()
                .read_to_string()
                .map_err(|err| PipelineError::Transport(err.to_string()))?
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send_with_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    headers: &[(String, String)],
    body: Option<&str>,
) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    let builder = with_headers(builder, headers);
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    Pending,
    Executed,
    Cancelled,
}

struct CallInner {
    id: Uuid,
    tag: String,
    phase: Mutex<CallPhase>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Handle to one submitted request.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    fn new(tag: String, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            inner: Arc::new(CallInner {
                id: Uuid::new_v4(),
                tag,
                phase: Mutex::new(CallPhase::Pending),
                cancel_tx: Mutex::new(Some(cancel_tx)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// The transport has returned for this call.
    pub fn is_executed(&self) -> bool {
        *self.inner.phase.lock() == CallPhase::Executed
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.phase.lock() == CallPhase::Cancelled
    }

    /// Cancel the call if it has not executed yet.
    ///
    /// Returns `true` if this call moved the request to cancelled. A request
    /// already on the wire may still reach the server.
    pub fn cancel(&self) -> bool {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != CallPhase::Pending {
                return false;
            }
            *phase = CallPhase::Cancelled;
        }
        if let Some(tx) = self.inner.cancel_tx.lock().take() {
            if tx.send(()).is_err() {
                warn!(call = %self.inner.id, "cancel signal not received; worker already finished");
            }
        }
        debug!(call = %self.inner.id, tag = %self.inner.tag, "call cancelled");
        true
    }

    fn mark_executed(&self) -> bool {
        let mut phase = self.inner.phase.lock();
        if *phase != CallPhase::Pending {
            return false;
        }
        *phase = CallPhase::Executed;
        true
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.tag)
            .field("phase", &*self.inner.phase.lock())
            .finish()
    }
}

/// Pending calls grouped by request tag.
#[derive(Default)]
struct CallRegistry {
    calls: Mutex<HashMap<String, Vec<Call>>>,
}

impl CallRegistry {
    fn insert(&self, call: &Call) {
        self.calls
            .lock()
            .entry(call.tag().to_string())
            .or_default()
            .push(call.clone());
    }

    fn remove(&self, call: &Call) {
        let mut calls = self.calls.lock();
        if let Some(tagged) = calls.get_mut(call.tag()) {
            tagged.retain(|c| c.id() != call.id());
            if tagged.is_empty() {
                calls.remove(call.tag());
            }
        }
    }

    fn take(&self, tag: &str) -> Vec<Call> {
        self.calls.lock().remove(tag).unwrap_or_default()
    }

    fn count(&self, tag: &str) -> usize {
        self.calls.lock().get(tag).map_or(0, Vec::len)
    }
}

/// Shared HTTP client: transport, worker pool, response cache and the
/// registry of in-flight calls.
///
/// Build one per process and hand it to controllers behind an `Arc`.
pub struct HttpManager {
    config: HttpConfig,
    runtime: Option<Runtime>,
    handle: Handle,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<ResponseCache>>,
    registry: Arc<CallRegistry>,
}

impl HttpManager {
    /// Create a manager that talks HTTP through ureq.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let transport = UreqTransport::new(&config);
        Self::with_transport(config, transport)
    }

    /// Create a manager around a custom transport.
    pub fn with_transport<T: Transport>(config: HttpConfig, transport: T) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads())
            .max_blocking_threads(config.worker_threads())
            .thread_name("courier-worker")
            .enable_all()
            .build()
            .map_err(|err| PipelineError::Configuration(format!("cannot start worker pool: {err}")))?;
        let cache = config
            .cache
            .as_ref()
            .map(ResponseCache::open)
            .transpose()?
            .map(Arc::new);

        info!(
            workers = config.worker_threads(),
            connect_timeout_secs = config.connect_timeout().as_secs(),
            read_timeout_secs = config.read_timeout().as_secs(),
            write_timeout_secs = config.write_timeout().as_secs(),
            cache = cache.is_some(),
            "http manager started"
        );

        Ok(Self {
            config,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            transport: Arc::new(transport),
            cache,
            registry: Arc::new(CallRegistry::default()),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Run `request` on the worker pool and return immediately.
    ///
    /// `on_complete` runs on a worker thread with the response or the
    /// failure, unless the returned `Call` is cancelled first.
    pub fn submit<F>(&self, request: HttpRequest, on_complete: F) -> Call
    where
        F: FnOnce(Result<HttpResponse>) + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let call = Call::new(request.tag.clone(), cancel_tx);
        self.registry.insert(&call);

        let transport = Arc::clone(&self.transport);
        let cache = self.cache.clone();
        let registry = Arc::clone(&self.registry);
        let task_call = call.clone();

        self.handle.spawn(async move {
            let work = tokio::task::spawn_blocking(move || perform(transport.as_ref(), cache.as_deref(), &request));
            tokio::select! {
                joined = work => {
                    registry.remove(&task_call);
                    if !task_call.mark_executed() {
                        return;
                    }
                    let result = joined
                        .unwrap_or_else(|err| Err(PipelineError::Other(format!("request worker failed: {err}"))));
                    on_complete(result);
                }
                _ = cancel_rx => {
                    registry.remove(&task_call);
                }
            }
        });

        call
    }

    /// Cancel every pending call carrying `tag`. Returns how many were
    /// cancelled.
    pub fn cancel_tag(&self, tag: &str) -> usize {
        self.registry
            .take(tag)
            .into_iter()
            .filter(|call| call.cancel())
            .count()
    }

    /// Number of calls with `tag` that have not finished.
    pub fn in_flight(&self, tag: &str) -> usize {
        self.registry.count(tag)
    }

    /// Drop every cached response. Errors are logged.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear() {
                warn!(dir = %cache.dir().display(), error = %err, "failed to clear response cache");
            }
        }
    }
}

impl Drop for HttpManager {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for HttpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpManager")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

fn perform(
    transport: &dyn Transport,
    cache: Option<&ResponseCache>,
    request: &HttpRequest,
) -> Result<HttpResponse> {
    let cache = cache.filter(|_| request.method == HttpMethod::Get);
    if let Some(hit) = cache.and_then(|cache| cache.get(&request.url)) {
        return Ok(hit);
    }

    let response = transport.execute(request)?;
    if !response.is_ok() {
        debug!(url = %request.url, status = response.status, "non-200 response");
        return Err(PipelineError::Protocol {
            status: response.status,
        });
    }
    if let Some(cache) = cache {
        cache.put(&request.url, &response);
    }
    Ok(response)
}
