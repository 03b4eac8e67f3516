//! The request state machine.
//!
//! Every mutation of a request happens here, on the request's own store
//! task. Asynchronous phases (preprocessing, the transport call, retry
//! evaluation, backoff) are returned as effects and their results come back
//! as actions. A phase result is only accepted while the request is still in
//! that phase; anything else is stale (typically the request was cancelled
//! in the meantime) and is dropped.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use courier_core::effect::Effect;
use courier_core::reducer::Reducer;
use courier_core::transport::cancel_pair;
use courier_core::{
    CallError, CancelHandle, OutboundRequest, Priority, Result, SmallVec, Transport,
    TransportOutcome, smallvec,
};

use super::Request;
use super::Shared;
use super::hooks::{
    Deserializer, Interceptor, Preprocess, Processor, RetryCondition, RetryContext, Serializer,
    Validator,
};
use super::outcome::Outcome;
use crate::metrics::RequestMetrics;
use crate::retry::RetryPolicy;
use crate::store::{Mailbox, WeakMailbox};

type Effects<P, R> = SmallVec<[Effect<RequestAction<P, R>>; 4]>;

/// Configuration messages. All but `Validate` are ignored once the request
/// has been called.
pub(crate) enum Configure<P, R> {
    Process {
        priority: Priority,
        processor: Processor,
    },
    Validate(Validator<P>),
    Retry(RetryCondition<P, R>),
    Backoff(RetryPolicy),
    Preprocess(Preprocess),
    BeforeCalling(Interceptor<P, R>),
    AfterCalling(Interceptor<P, R>),
}

/// Messages understood by a request's store.
pub(crate) enum RequestAction<P, R> {
    Configure(Configure<P, R>),
    Subscribe(Interceptor<P, R>),
    /// Carries a strong mailbox that keeps the request alive until its
    /// completion callbacks have run.
    Call(Mailbox<RequestAction<P, R>>),
    Cancel,
    Preprocessed(Result<()>),
    TransportFinished(TransportOutcome),
    RetryDecided(Result<bool>),
    BackoffElapsed,
    Notify,
}

impl<P, R> fmt::Debug for RequestAction<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configure(_) => f.write_str("Configure"),
            Self::Subscribe(_) => f.write_str("Subscribe"),
            Self::Call(_) => f.write_str("Call"),
            Self::Cancel => f.write_str("Cancel"),
            Self::Preprocessed(result) => f.debug_tuple("Preprocessed").field(result).finish(),
            Self::TransportFinished(outcome) => {
                f.debug_tuple("TransportFinished").field(outcome).finish()
            },
            Self::RetryDecided(decision) => f.debug_tuple("RetryDecided").field(decision).finish(),
            Self::BackoffElapsed => f.write_str("BackoffElapsed"),
            Self::Notify => f.write_str("Notify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Preprocessing,
    InFlight,
    RetryEvaluating,
    BackingOff,
    Completed,
}

/// Injected dependencies of a request.
#[derive(Clone)]
pub(crate) struct RequestEnvironment {
    pub(crate) transport: Arc<dyn Transport>,
}

/// State owned by a request's store task.
pub(crate) struct RequestState<P, R> {
    shared: Arc<Shared<P, R>>,
    this: WeakMailbox<RequestAction<P, R>>,
    /// Held from dispatch until notification.
    keep_alive: Option<Mailbox<RequestAction<P, R>>>,

    serializer: Serializer<P>,
    deserializer: Deserializer<P, R>,
    preprocess: Option<Preprocess>,
    processors: Vec<(Priority, Processor)>,
    validators: Vec<Validator<P>>,
    retry_conditions: Vec<RetryCondition<P, R>>,
    backoff: Option<RetryPolicy>,

    before_calling: Vec<Interceptor<P, R>>,
    after_calling: Vec<Interceptor<P, R>>,
    completion: Vec<Interceptor<P, R>>,

    phase: Phase,
    in_flight: Option<CancelHandle>,
    outcome: Arc<Outcome<R>>,
    called: bool,
    cancelled: bool,
    completed: bool,
    notified: bool,
    retry_count: u32,
    started_at: Option<Instant>,
}

impl<P, R> RequestState<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub(crate) fn new(
        shared: Arc<Shared<P, R>>,
        this: WeakMailbox<RequestAction<P, R>>,
        serializer: Serializer<P>,
        deserializer: Deserializer<P, R>,
    ) -> Self {
        Self {
            shared,
            this,
            keep_alive: None,
            serializer,
            deserializer,
            preprocess: None,
            processors: Vec::new(),
            validators: Vec::new(),
            retry_conditions: Vec::new(),
            backoff: None,
            before_calling: Vec::new(),
            after_calling: Vec::new(),
            completion: Vec::new(),
            phase: Phase::Idle,
            in_flight: None,
            outcome: Arc::new(Outcome::default()),
            called: false,
            cancelled: false,
            completed: false,
            notified: false,
            retry_count: 0,
            started_at: None,
        }
    }

    fn handle(&self) -> Option<Request<P, R>> {
        self.keep_alive
            .clone()
            .or_else(|| self.this.upgrade())
            .map(|mailbox| Request::from_parts(Arc::clone(&self.shared), mailbox))
    }

    fn run_interceptors(&self, interceptors: Vec<Interceptor<P, R>>) {
        if interceptors.is_empty() {
            return;
        }
        let Some(request) = self.handle() else {
            tracing::trace!(request_id = %self.shared.id, "Request abandoned, skipping hooks");
            return;
        };
        for interceptor in interceptors {
            interceptor(&request);
        }
    }

    fn configure(&mut self, configuration: Configure<P, R>) {
        match configuration {
            Configure::Validate(validator) => {
                if self.completed {
                    tracing::trace!(request_id = %self.shared.id, "Ignoring validator after completion");
                } else {
                    self.validators.push(validator);
                }
            },
            _ if self.called => {
                tracing::trace!(request_id = %self.shared.id, "Ignoring configuration after call");
            },
            Configure::Process {
                priority,
                processor,
            } => self.processors.push((priority, processor)),
            Configure::Retry(condition) => self.retry_conditions.push(condition),
            Configure::Backoff(policy) => self.backoff = Some(policy),
            Configure::Preprocess(preprocess) => self.preprocess = Some(preprocess),
            Configure::BeforeCalling(interceptor) => self.before_calling.push(interceptor),
            Configure::AfterCalling(interceptor) => self.after_calling.push(interceptor),
        }
    }

    fn subscribe(&mut self, callback: Interceptor<P, R>) {
        if self.notified {
            self.run_interceptors(vec![callback]);
        } else {
            self.completion.push(callback);
        }
    }

    fn call(
        &mut self,
        caller: Mailbox<RequestAction<P, R>>,
        env: &RequestEnvironment,
    ) -> Effects<P, R> {
        if self.cancelled || self.called {
            return smallvec![Effect::None];
        }

        self.keep_alive = Some(caller);
        self.called = true;
        self.shared.called.store(true, Ordering::Release);
        self.started_at = Some(Instant::now());
        // Stable sort: equal priorities keep registration order.
        self.processors.sort_by(|a, b| b.0.cmp(&a.0));

        tracing::debug!(
            request_id = %self.shared.id,
            method = %self.shared.method,
            url = %self.shared.url,
            "Calling request"
        );
        RequestMetrics::record_dispatch();

        let before = std::mem::take(&mut self.before_calling);
        self.run_interceptors(before);

        let effects = self.dispatch(env);

        let after = std::mem::take(&mut self.after_calling);
        self.run_interceptors(after);

        effects
    }

    /// Start an attempt: preprocess first if configured, then perform.
    fn dispatch(&mut self, env: &RequestEnvironment) -> Effects<P, R> {
        tracing::debug!(
            request_id = %self.shared.id,
            attempt = self.retry_count,
            "Starting attempt"
        );
        RequestMetrics::record_attempt();

        match &self.preprocess {
            Some(preprocess) => {
                self.phase = Phase::Preprocessing;
                let work = preprocess();
                smallvec![Effect::future(async move {
                    RequestAction::Preprocessed(work.await)
                })]
            },
            None => self.perform(env),
        }
    }

    fn perform(&mut self, env: &RequestEnvironment) -> Effects<P, R> {
        match self.assemble() {
            Ok(request) => {
                let (handle, signal) = cancel_pair();
                self.in_flight = Some(handle);
                self.phase = Phase::InFlight;

                let call = env.transport.perform(request, signal);
                smallvec![Effect::future(async move {
                    RequestAction::TransportFinished(call.await)
                })]
            },
            Err(error) => {
                self.record_error(error);
                self.retry_or_complete()
            },
        }
    }

    fn assemble(&self) -> Result<OutboundRequest> {
        let body = (self.serializer)(&self.shared.parameters)?;
        let mut request =
            OutboundRequest::assemble(self.shared.method.clone(), self.shared.url.clone(), body);
        for (_, processor) in &self.processors {
            processor(&mut request)?;
        }
        Ok(request)
    }

    fn preprocessed(&mut self, result: Result<()>, env: &RequestEnvironment) -> Effects<P, R> {
        if self.phase != Phase::Preprocessing {
            return smallvec![Effect::None];
        }
        match result {
            Ok(()) => self.perform(env),
            Err(error) => {
                self.record_error(error);
                self.retry_or_complete()
            },
        }
    }

    fn transport_finished(&mut self, finished: TransportOutcome) -> Effects<P, R> {
        if self.phase != Phase::InFlight {
            return smallvec![Effect::None];
        }
        self.in_flight = None;

        let outcome = Arc::make_mut(&mut self.outcome);
        outcome.request = finished.request;
        outcome.response = finished.response;
        outcome.payload = finished.payload;
        outcome.error = finished.error;

        self.resolve();
        self.retry_or_complete()
    }

    /// Validate and deserialize the attempt's response, unless it already failed.
    fn resolve(&mut self) {
        let outcome = Arc::make_mut(&mut self.outcome);
        if outcome.error.is_some() {
            return;
        }
        let (Some(request), Some(response)) = (&outcome.request, &outcome.response) else {
            outcome.error = Some(CallError::RequestFailure);
            return;
        };

        let parameters = &self.shared.parameters;
        let payload = outcome.payload.as_ref();
        let resolved = self
            .validators
            .iter()
            .try_for_each(|validator| validator(parameters, request, response, payload))
            .and_then(|()| (self.deserializer)(parameters, request, response, payload));

        match resolved {
            Ok(result) => outcome.result = Some(Arc::new(result)),
            Err(error) => outcome.error = Some(error),
        }
    }

    fn retry_or_complete(&mut self) -> Effects<P, R> {
        if self.retry_conditions.is_empty() {
            return self.complete();
        }

        self.phase = Phase::RetryEvaluating;
        let shared = Arc::clone(&self.shared);
        let outcome = Arc::clone(&self.outcome);
        let conditions = self.retry_conditions.clone();
        let attempt = self.retry_count;

        smallvec![Effect::future(async move {
            let decision = tokio::task::spawn_blocking(move || {
                evaluate(&shared.parameters, &outcome, &conditions, attempt)
            })
            .await
            .unwrap_or_else(|error| Err(CallError::retry_condition(error)));
            RequestAction::RetryDecided(decision)
        })]
    }

    fn retry_decided(&mut self, decision: Result<bool>, env: &RequestEnvironment) -> Effects<P, R> {
        if self.phase != Phase::RetryEvaluating {
            return smallvec![Effect::None];
        }
        match decision {
            Err(error) => {
                self.record_error(error);
                self.complete()
            },
            Ok(true) if self.cancelled => {
                if self.outcome.error.is_none() {
                    self.record_error(CallError::RequestCancelled);
                }
                self.complete()
            },
            Ok(true) => self.retry(env),
            Ok(false) => self.complete(),
        }
    }

    fn retry(&mut self, env: &RequestEnvironment) -> Effects<P, R> {
        let previous = self.outcome.error.clone();
        self.retry_count += 1;
        self.shared
            .retry_count
            .store(self.retry_count, Ordering::Release);
        self.outcome = Arc::new(Outcome::default());

        tracing::warn!(
            request_id = %self.shared.id,
            attempt = self.retry_count,
            error = ?previous,
            "Retrying request"
        );
        RequestMetrics::record_retry();

        match &self.backoff {
            Some(policy) => {
                self.phase = Phase::BackingOff;
                smallvec![Effect::Delay {
                    duration: policy.delay_for_attempt(self.retry_count - 1),
                    action: Box::new(RequestAction::BackoffElapsed),
                }]
            },
            None => self.dispatch(env),
        }
    }

    fn backoff_elapsed(&mut self, env: &RequestEnvironment) -> Effects<P, R> {
        if self.phase != Phase::BackingOff {
            return smallvec![Effect::None];
        }
        self.dispatch(env)
    }

    fn cancel(&mut self) -> Effects<P, R> {
        if self.cancelled || self.completed {
            return smallvec![Effect::None];
        }

        self.cancelled = true;
        self.shared.cancelled.store(true, Ordering::Release);
        RequestMetrics::record_cancel();

        if let Some(handle) = &self.in_flight {
            tracing::debug!(request_id = %self.shared.id, "Cancelling in-flight call");
            handle.cancel();
            smallvec![Effect::None]
        } else {
            tracing::debug!(request_id = %self.shared.id, "Cancelled without a call in flight");
            self.record_error(CallError::RequestCancelled);
            self.complete()
        }
    }

    fn record_error(&mut self, error: CallError) {
        Arc::make_mut(&mut self.outcome).error = Some(error);
    }

    fn complete(&mut self) -> Effects<P, R> {
        if self.completed {
            return smallvec![Effect::None];
        }

        self.completed = true;
        self.phase = Phase::Completed;
        self.in_flight = None;

        let _ = self.shared.outcome.set(Arc::clone(&self.outcome));
        self.shared.completed.store(true, Ordering::Release);

        let label = match self.outcome.error() {
            None => "success",
            Some(CallError::RequestCancelled) => "cancelled",
            Some(_) => "failure",
        };
        RequestMetrics::record_completion(label, self.started_at.map(|at| at.elapsed()));
        tracing::debug!(
            request_id = %self.shared.id,
            attempt = self.retry_count,
            outcome = label,
            error = ?self.outcome.error(),
            "Request completed"
        );

        // Notify on the next turn so after-calling hooks of the current
        // `call` still run before any completion callback.
        smallvec![Effect::future(async { RequestAction::Notify })]
    }

    fn notify(&mut self) {
        if self.notified {
            return;
        }
        self.notified = true;
        let callbacks = std::mem::take(&mut self.completion);
        self.run_interceptors(callbacks);
        // Without other handles the store now drains and stops.
        self.keep_alive = None;
    }
}

fn evaluate<P, R>(
    parameters: &P,
    outcome: &Outcome<R>,
    conditions: &[RetryCondition<P, R>],
    attempt: u32,
) -> Result<bool> {
    let context = RetryContext {
        parameters,
        request: outcome.request(),
        response: outcome.response(),
        payload: outcome.payload(),
        result: outcome.result(),
        error: outcome.error(),
        attempt,
    };
    for condition in conditions {
        if condition(&context)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reducer driving a single request.
pub(crate) struct RequestReducer<P, R> {
    _marker: PhantomData<fn() -> (P, R)>,
}

impl<P, R> RequestReducer<P, R> {
    pub(crate) const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<P, R> Reducer for RequestReducer<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    type State = RequestState<P, R>;
    type Action = RequestAction<P, R>;
    type Environment = RequestEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<P, R> {
        match action {
            RequestAction::Configure(configuration) => {
                state.configure(configuration);
                smallvec![Effect::None]
            },
            RequestAction::Subscribe(callback) => {
                state.subscribe(callback);
                smallvec![Effect::None]
            },
            RequestAction::Call(caller) => state.call(caller, env),
            RequestAction::Cancel => state.cancel(),
            RequestAction::Preprocessed(result) => state.preprocessed(result, env),
            RequestAction::TransportFinished(finished) => state.transport_finished(finished),
            RequestAction::RetryDecided(decision) => state.retry_decided(decision, env),
            RequestAction::BackoffElapsed => state.backoff_elapsed(env),
            RequestAction::Notify => {
                state.notify();
                smallvec![Effect::None]
            },
        }
    }
}
