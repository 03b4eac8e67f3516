//! Typed, configurable, cancellable requests.
//!
//! A [`Request<P, R>`] pairs parameters of type `P` with a result of type
//! `R`. It is configured fluently, dispatched once with [`Request::call`],
//! and completes exactly once with either a result or a [`CallError`].
//!
//! # Pipeline
//!
//! Each attempt runs the same steps:
//!
//! 1. preprocessing (optional, async, re-run on every attempt)
//! 2. serialization of the parameters into the body
//! 3. assembly of the [`OutboundRequest`] and processors in descending
//!    [`Priority`]
//! 4. the transport call
//! 5. validators in registration order, then deserialization
//! 6. retry conditions; the first one answering `true` starts a new attempt
//!
//! # Concurrency
//!
//! The handle is cheap to clone and every method takes `&self`. All state
//! lives in a store task owned by the request; methods only post messages to
//! it. Configuration methods return a clone of the handle for chaining.
//!
//! # Example
//!
//! ```ignore
//! let request = Request::new(Method::POST, url, params, json_body, json_result, transport)
//!     .process(courier_runtime::process::header("x-api-key", key))
//!     .validate(courier_runtime::validate::success_status())
//!     .retry(courier_runtime::retry::on_transport_failure(3))
//!     .on_success(|user: &User| println!("created {}", user.id))
//!     .on_failure(|error| eprintln!("failed: {error}"))
//!     .call();
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use courier_core::{
    Bytes, CallError, Method, OutboundRequest, Priority, ResponseMetadata, Result, Transport, Url,
};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::queue::SerialQueue;
use crate::retry::RetryPolicy;
use crate::store::{Mailbox, Store};

mod hooks;
mod outcome;
mod reducer;

pub use hooks::RetryContext;
pub use outcome::Outcome;

use reducer::{Configure, RequestAction, RequestEnvironment, RequestReducer, RequestState};

/// Process-unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// State readable from any handle. Written only by the request's store task.
pub(crate) struct Shared<P, R> {
    pub(crate) id: RequestId,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) parameters: P,
    pub(crate) called: AtomicBool,
    pub(crate) cancelled: AtomicBool,
    pub(crate) completed: AtomicBool,
    pub(crate) retry_count: AtomicU32,
    pub(crate) outcome: OnceLock<Arc<Outcome<R>>>,
}

impl<P, R> Shared<P, R> {
    pub(crate) fn new(method: Method, url: Url, parameters: P) -> Self {
        Self {
            id: RequestId::next(),
            method,
            url,
            parameters,
            called: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            outcome: OnceLock::new(),
        }
    }
}

/// Handle to a typed request.
///
/// Dropping every handle of a request that was never called abandons it: its
/// store stops, nothing is sent and no completion callback runs. Once called,
/// the request keeps itself alive until it has completed and notified its
/// subscribers.
pub struct Request<P, R> {
    shared: Arc<Shared<P, R>>,
    mailbox: Mailbox<RequestAction<P, R>>,
}

impl<P, R> Clone for Request<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<P, R> fmt::Debug for Request<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.shared.id)
            .field("method", &self.shared.method)
            .field("url", &self.shared.url.as_str())
            .field("called", &self.is_called())
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

impl<P, R> Request<P, R> {
    pub(crate) const fn from_parts(
        shared: Arc<Shared<P, R>>,
        mailbox: Mailbox<RequestAction<P, R>>,
    ) -> Self {
        Self { shared, mailbox }
    }

    /// Identifier, unique within the process
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.shared.id
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.shared.method
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Parameters the request was created with
    #[must_use]
    pub fn parameters(&self) -> &P {
        &self.shared.parameters
    }

    /// Whether `call` has taken effect
    #[must_use]
    pub fn is_called(&self) -> bool {
        self.shared.called.load(Ordering::Acquire)
    }

    /// Whether `cancel` has taken effect
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Whether the request has finished
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Number of retries started so far
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::Acquire)
    }

    /// Frozen outcome, once completed
    #[must_use]
    pub fn outcome(&self) -> Option<Arc<Outcome<R>>> {
        self.shared.outcome.get().cloned()
    }

    /// Request description actually sent, once completed
    #[must_use]
    pub fn sent_request(&self) -> Option<&OutboundRequest> {
        self.shared.outcome.get().and_then(|outcome| outcome.request())
    }

    /// Response metadata, once completed
    #[must_use]
    pub fn response_metadata(&self) -> Option<&ResponseMetadata> {
        self.shared.outcome.get().and_then(|outcome| outcome.response())
    }

    /// Raw response payload, once completed
    #[must_use]
    pub fn payload(&self) -> Option<&Bytes> {
        self.shared.outcome.get().and_then(|outcome| outcome.payload())
    }

    /// Deserialized result, once completed successfully
    #[must_use]
    pub fn result(&self) -> Option<&R> {
        self.shared.outcome.get().and_then(|outcome| outcome.result())
    }

    /// Terminal error, once completed with one
    #[must_use]
    pub fn error(&self) -> Option<&CallError> {
        self.shared.outcome.get().and_then(|outcome| outcome.error())
    }

    /// Cancel the request
    ///
    /// Without a transport call in flight the request completes right away
    /// with [`CallError::RequestCancelled`]; otherwise the transport is
    /// signalled and the request completes with whatever it reports.
    pub fn cancel(&self) {
        self.send(RequestAction::Cancel);
    }

    fn send(&self, action: RequestAction<P, R>) {
        if self.mailbox.send(action).is_err() {
            tracing::warn!(request_id = %self.shared.id, "Request store is gone, message dropped");
        }
    }
}

impl<P, R> Request<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Create a request. Must be called from within a Tokio runtime.
    ///
    /// Nothing is sent until [`Request::call`].
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the request's store
    /// is a spawned task.
    pub fn new<S, D>(
        method: Method,
        url: Url,
        parameters: P,
        serializer: S,
        deserializer: D,
        transport: Arc<dyn Transport>,
    ) -> Self
    where
        S: Fn(&P) -> Result<Option<Bytes>> + Send + 'static,
        D: Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<R>
            + Send
            + 'static,
    {
        let shared = Arc::new(Shared::new(method, url, parameters));
        let mailbox = Store::new(RequestReducer::new(), RequestEnvironment { transport }).spawn({
            let shared = Arc::clone(&shared);
            move |this| {
                RequestState::new(shared, this, Box::new(serializer), Box::new(deserializer))
            }
        });

        tracing::trace!(request_id = %shared.id, "Request created");
        Self { shared, mailbox }
    }

    fn configure(&self, configuration: Configure<P, R>) -> Self {
        self.send(RequestAction::Configure(configuration));
        self.clone()
    }

    /// Add a request processor at [`Priority::Normal`]
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn process<F>(&self, processor: F) -> Self
    where
        F: Fn(&mut OutboundRequest) -> Result<()> + Send + 'static,
    {
        self.process_with_priority(Priority::Normal, processor)
    }

    /// Add a request processor
    ///
    /// Processors run in descending priority, ties in registration order.
    /// Ignored once the request has been called.
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn process_with_priority<F>(&self, priority: Priority, processor: F) -> Self
    where
        F: Fn(&mut OutboundRequest) -> Result<()> + Send + 'static,
    {
        self.configure(Configure::Process {
            priority,
            processor: Box::new(processor),
        })
    }

    /// Add a response validator
    ///
    /// Validators run in registration order before deserialization; the
    /// first failure wins. Accepted until the request completes.
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn validate<F>(&self, validator: F) -> Self
    where
        F: Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<()>
            + Send
            + 'static,
    {
        self.configure(Configure::Validate(Box::new(validator)))
    }

    /// Add a retry condition
    ///
    /// Conditions are evaluated off the request's context after every
    /// attempt; the first `Ok(true)` starts a new attempt and an `Err`
    /// becomes the terminal error.
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn retry<F>(&self, condition: F) -> Self
    where
        F: Fn(&RetryContext<'_, P, R>) -> Result<bool> + Send + Sync + 'static,
    {
        self.configure(Configure::Retry(Arc::new(condition)))
    }

    /// Wait between attempts according to `policy`
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn backoff(&self, policy: RetryPolicy) -> Self {
        self.configure(Configure::Backoff(policy))
    }

    /// Set the async preprocessing step, replacing any previous one
    ///
    /// `preprocess` is invoked at the start of every attempt; an error
    /// becomes that attempt's error.
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn preprocess<F, Fut>(&self, preprocess: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.configure(Configure::Preprocess(Box::new(move || preprocess().boxed())))
    }

    /// Run `interceptor` once, just before the request is dispatched
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn before_calling<F>(&self, interceptor: F) -> Self
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        self.configure(Configure::BeforeCalling(Box::new(interceptor)))
    }

    /// Run `interceptor` once, right after the request is dispatched
    #[must_use = "configuration takes effect even if the returned handle is dropped"]
    pub fn after_calling<F>(&self, interceptor: F) -> Self
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        self.configure(Configure::AfterCalling(Box::new(interceptor)))
    }

    /// Dispatch the request. Only the first call has any effect, and none
    /// after cancellation.
    ///
    /// A dispatched request stays alive until its completion callbacks have
    /// run, so the returned handle may be dropped right away.
    #[allow(clippy::return_self_not_must_use)]
    pub fn call(&self) -> Self {
        self.send(RequestAction::Call(self.mailbox.clone()));
        self.clone()
    }

    /// Resolve with the frozen outcome once the request completes
    ///
    /// Returns `None` if the request can no longer complete.
    pub async fn wait(&self) -> Option<Arc<Outcome<R>>> {
        if let Some(outcome) = self.outcome() {
            return Some(outcome);
        }
        let (tx, rx) = oneshot::channel();
        self.send(RequestAction::Subscribe(Box::new(move |request: &Self| {
            let _ = tx.send(request.outcome());
        })));
        rx.await.ok().flatten()
    }

    /// Subscribe to completion with the full request
    ///
    /// Handlers registered before completion run in registration order once
    /// the request completes; handlers registered afterwards run right away
    /// on the request's context.
    #[allow(clippy::return_self_not_must_use)]
    pub fn response<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        self.send(RequestAction::Subscribe(Box::new(handler)));
        self.clone()
    }

    /// Subscribe to completion on an explicit serial queue
    #[allow(clippy::return_self_not_must_use)]
    pub fn response_on<F>(&self, queue: &SerialQueue, handler: F) -> Self
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let queue = queue.clone();
        self.response(move |request| {
            let request = request.clone();
            if queue.submit(move || handler(&request)).is_err() {
                tracing::warn!(queue = queue.name(), "Serial queue is gone, handler dropped");
            }
        })
    }

    fn on_outcome<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&P, &Outcome<R>) + Send + 'static,
    {
        self.response(move |request| {
            if let Some(outcome) = request.shared.outcome.get() {
                handler(&request.shared.parameters, outcome);
            }
        })
    }

    /// Subscribe to completion with every part of the outcome
    #[allow(clippy::return_self_not_must_use)]
    pub fn response_parts<F>(&self, handler: F) -> Self
    where
        F: FnOnce(
                &P,
                Option<&OutboundRequest>,
                Option<&ResponseMetadata>,
                Option<&Bytes>,
                Option<&R>,
                Option<&CallError>,
            ) + Send
            + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            handler(
                parameters,
                outcome.request(),
                outcome.response(),
                outcome.payload(),
                outcome.result(),
                outcome.error(),
            );
        })
    }

    /// Subscribe to completion with parameters, result and error
    #[allow(clippy::return_self_not_must_use)]
    pub fn response_parameters<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&P, Option<&R>, Option<&CallError>) + Send + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            handler(parameters, outcome.result(), outcome.error());
        })
    }

    /// Subscribe to completion with result and error
    #[allow(clippy::return_self_not_must_use)]
    pub fn response_result<F>(&self, handler: F) -> Self
    where
        F: FnOnce(Option<&R>, Option<&CallError>) + Send + 'static,
    {
        self.on_outcome(move |_, outcome| handler(outcome.result(), outcome.error()))
    }

    /// Run `handler` if the request completes with a result
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_success<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&R) + Send + 'static,
    {
        self.on_success_with(move |_, result| handler(result))
    }

    /// Run `handler` with the parameters if the request completes with a result
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_success_with<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&P, &R) + Send + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            if let Ok(result) = outcome.as_result() {
                handler(parameters, result);
            }
        })
    }

    /// Run `handler` with the full exchange if the request completes with a result
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_success_detailed<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>, &R) + Send + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            if let (None, Some(request), Some(response), Some(result)) = (
                outcome.error(),
                outcome.request(),
                outcome.response(),
                outcome.result(),
            ) {
                handler(parameters, request, response, outcome.payload(), result);
            }
        })
    }

    /// Run `handler` if the request completes with an error
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_failure<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&CallError) + Send + 'static,
    {
        self.on_failure_with(move |_, error| handler(error))
    }

    /// Run `handler` with the parameters if the request completes with an error
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_failure_with<F>(&self, handler: F) -> Self
    where
        F: FnOnce(&P, &CallError) + Send + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            if let Some(error) = outcome.error() {
                handler(parameters, error);
            }
        })
    }

    /// Run `handler` with everything known if the request completes with an error
    #[allow(clippy::return_self_not_must_use)]
    pub fn on_failure_detailed<F>(&self, handler: F) -> Self
    where
        F: FnOnce(
                &P,
                Option<&OutboundRequest>,
                Option<&ResponseMetadata>,
                Option<&Bytes>,
                Option<&R>,
                &CallError,
            ) + Send
            + 'static,
    {
        self.on_outcome(move |parameters, outcome| {
            if let Some(error) = outcome.error() {
                handler(
                    parameters,
                    outcome.request(),
                    outcome.response(),
                    outcome.payload(),
                    outcome.result(),
                    error,
                );
            }
        })
    }
}
