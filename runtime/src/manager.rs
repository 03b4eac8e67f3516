//! Endpoint-bound request factory and live-request registry.
//!
//! A [`Manager<P, R>`] creates [`Request`]s for one URL and method and keeps
//! every request it has dispatched until that request completes. That gives
//! callers fire-and-forget dispatch and bulk cancellation, and lets the
//! manager feed response `Date` headers into the shared [`ClockSkew`].
//!
//! The manager never touches request internals. It observes requests only
//! through the same hooks callers use: a before-calling interceptor adds the
//! request to the live set and a completion handler removes it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use courier_core::codec::{no_body, no_result};
use courier_core::environment::{Clock, SystemClock};
use courier_core::{
    Bytes, CallError, ClockSkew, Method, OutboundRequest, ResponseMetadata, Result, Transport, Url,
};

use crate::metrics::ManagerMetrics;
use crate::request::{Request, RequestId};
use crate::retry::RetryPolicy;

type LiveSet<P, R> = Mutex<HashMap<RequestId, Request<P, R>>>;

/// Per-manager request defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// HTTP method of every request (default `POST`)
    pub method: Method,
    /// Backoff applied to every request, if any
    pub backoff: Option<RetryPolicy>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            method: Method::POST,
            backoff: None,
        }
    }
}

impl ManagerConfig {
    /// Use `method` for every request
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Wait between attempts according to `policy`
    #[must_use]
    pub fn with_backoff(mut self, policy: RetryPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }
}

/// Typed request factory bound to one endpoint.
///
/// Dropping the manager cancels every request still in its live set.
pub struct Manager<P, R> {
    url: Url,
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    live: Arc<LiveSet<P, R>>,
    clock_skew: Arc<ClockSkew>,
    clock: Arc<dyn Clock>,
}

impl<P, R> fmt::Debug for Manager<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("url", &self.url.as_str())
            .field("method", &self.config.method)
            .field("live", &lock(&self.live).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P, R> Manager<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Manager for `url` using `POST`
    #[must_use]
    pub fn new(url: Url, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(url, transport, ManagerConfig::default())
    }

    /// Manager for an endpoint given as a string
    ///
    /// # Errors
    ///
    /// Returns [`CallError::IllegalUrl`] if `url` does not parse.
    pub fn parse(url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|_| CallError::IllegalUrl(url.to_string()))?;
        Ok(Self::new(parsed, transport))
    }

    /// Manager with explicit defaults
    #[must_use]
    pub fn with_config(url: Url, transport: Arc<dyn Transport>, config: ManagerConfig) -> Self {
        Self {
            url,
            config,
            transport,
            live: Arc::new(Mutex::new(HashMap::new())),
            clock_skew: ClockSkew::shared(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Feed server timestamps into `clock_skew` instead of the shared tracker
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Arc<ClockSkew>) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Read local time from `clock` when deriving skew estimates
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Endpoint URL
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.config.method
    }

    /// Create a request for this endpoint
    ///
    /// The request joins the live set when it is called and leaves it when
    /// it completes. Nothing is sent until [`Request::call`].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since every request runs
    /// on its own spawned task.
    pub fn request<S, D>(&self, parameters: P, serializer: S, deserializer: D) -> Request<P, R>
    where
        S: Fn(&P) -> Result<Option<Bytes>> + Send + 'static,
        D: Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<R>
            + Send
            + 'static,
    {
        let request = Request::new(
            self.config.method.clone(),
            self.url.clone(),
            parameters,
            serializer,
            deserializer,
            Arc::clone(&self.transport),
        );
        let request = match &self.config.backoff {
            Some(policy) => request.backoff(policy.clone()),
            None => request,
        };

        let live = Arc::downgrade(&self.live);
        let endpoint = self.url.to_string();
        let request = request.before_calling(move |request| track(&live, &endpoint, request));

        let live = Arc::downgrade(&self.live);
        let endpoint = self.url.to_string();
        let clock_skew = Arc::clone(&self.clock_skew);
        let clock = Arc::clone(&self.clock);
        request.response(move |request| {
            untrack(&live, &endpoint, request.id());
            if let Some(date) = request.response_metadata().and_then(ResponseMetadata::server_time) {
                let estimate = clock_skew.observe(date, clock.as_ref());
                tracing::trace!(
                    request_id = %request.id(),
                    offset_ms = estimate.offset().num_milliseconds(),
                    "Updated server clock skew"
                );
            }
        })
    }
}

impl<P, R> Manager<P, R> {
    /// Cancel every live request and clear the live set
    ///
    /// Requests that complete concurrently are either already gone from the
    /// set or see a no-op cancel.
    pub fn cancel_all(&self) {
        let drained: Vec<Request<P, R>> = {
            let mut live = lock(&self.live);
            live.drain().map(|(_, request)| request).collect()
        };
        if !drained.is_empty() {
            ManagerMetrics::record_left(self.url.as_str(), drained.len());
            tracing::debug!(url = %self.url, count = drained.len(), "Cancelling all live requests");
        }
        for request in drained {
            request.cancel();
        }
    }

    /// Number of dispatched, not yet completed requests
    #[must_use]
    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// Handles to every dispatched, not yet completed request
    #[must_use]
    pub fn live_requests(&self) -> Vec<Request<P, R>> {
        lock(&self.live).values().cloned().collect()
    }
}

fn track<P, R>(live: &Weak<LiveSet<P, R>>, endpoint: &str, request: &Request<P, R>) {
    let Some(live) = live.upgrade() else {
        return;
    };
    let previous = lock(&live).insert(request.id(), request.clone());
    if previous.is_none() {
        ManagerMetrics::record_joined(endpoint, 1);
    }
}

fn untrack<P, R>(live: &Weak<LiveSet<P, R>>, endpoint: &str, id: RequestId) {
    let Some(live) = live.upgrade() else {
        return;
    };
    let removed = lock(&live).remove(&id);
    if removed.is_some() {
        ManagerMetrics::record_left(endpoint, 1);
    }
}

impl<R> Manager<(), R>
where
    R: Send + Sync + 'static,
{
    /// Create a request without parameters or body
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since every request runs
    /// on its own spawned task.
    pub fn request_no_parameters<D>(&self, deserializer: D) -> Request<(), R>
    where
        D: Fn(&(), &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<R>
            + Send
            + 'static,
    {
        self.request((), no_body, deserializer)
    }
}

impl<P> Manager<P, ()>
where
    P: Send + Sync + 'static,
{
    /// Create a request whose response is not interpreted
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since every request runs
    /// on its own spawned task.
    pub fn request_no_result<S>(&self, parameters: P, serializer: S) -> Request<P, ()>
    where
        S: Fn(&P) -> Result<Option<Bytes>> + Send + 'static,
    {
        self.request(parameters, serializer, no_result)
    }
}

impl Manager<(), ()> {
    /// Create a request with neither parameters nor result
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since every request runs
    /// on its own spawned task.
    pub fn request_empty(&self) -> Request<(), ()> {
        self.request((), no_body, no_result)
    }
}

impl<P, R> Drop for Manager<P, R> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
