//! # Courier Testing
//!
//! Testing utilities and helpers for the Courier request pipeline.
//!
//! This crate provides:
//! - A scripted [`MockTransport`] that records what it was asked to send
//! - A deterministic [`FixedClock`]
//! - Test tracing setup
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{MockTransport, ScriptedResponse};
//!
//! #[tokio::test]
//! async fn test_fetch_user() {
//!     let transport = Arc::new(MockTransport::with_responses([
//!         ScriptedResponse::json(&serde_json::json!({ "id": 1 })),
//!     ]));
//!     let users: Manager<(), User> = Manager::parse("https://api.example.com/user", transport.clone())?;
//!
//!     let outcome = users.request_no_parameters(json_result).call().wait().await;
//!     assert!(outcome.is_success());
//!     assert_eq!(transport.call_count(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

/// Mock implementations of environment capabilities
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    use std::collections::VecDeque;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use courier_core::{
        Bytes, CallError, CancelSignal, OutboundRequest, ResponseMetadata, StatusCode, Transport,
        TransportFuture, TransportOutcome,
    };
    use serde::Serialize;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// One scripted answer of a [`MockTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum ScriptedResponse {
        /// Answer with a response, optionally after a delay
        Reply {
            /// Response metadata
            response: ResponseMetadata,
            /// Raw payload
            payload: Option<Bytes>,
            /// Time to wait before answering; cancellation cuts it short
            delay: Option<Duration>,
        },
        /// Report a transport failure
        Fail(CallError),
        /// Never answer until cancelled
        Hang,
        /// Report neither a response nor an error
        Empty,
    }

    impl ScriptedResponse {
        /// `200 OK` without a payload
        #[must_use]
        pub fn ok() -> Self {
            Self::status(StatusCode::OK)
        }

        /// The given status without a payload
        #[must_use]
        pub fn status(status: StatusCode) -> Self {
            Self::Reply {
                response: ResponseMetadata::new(status),
                payload: None,
                delay: None,
            }
        }

        /// `200 OK` with `value` as JSON payload
        ///
        /// # Panics
        ///
        /// Panics if `value` cannot be serialized.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
            let payload = serde_json::to_vec(value).expect("test payload should serialize");
            Self::Reply {
                response: ResponseMetadata::new(StatusCode::OK)
                    .with_header("content-type", "application/json"),
                payload: Some(Bytes::from(payload)),
                delay: None,
            }
        }

        /// A transport failure with the given message
        #[must_use]
        pub fn failure(message: &str) -> Self {
            Self::Fail(CallError::transport(message))
        }

        /// Hang until cancelled
        #[must_use]
        pub const fn hang() -> Self {
            Self::Hang
        }

        /// Add a response header; other variants are returned unchanged
        #[must_use]
        pub fn with_header(self, name: &str, value: &str) -> Self {
            match self {
                Self::Reply {
                    response,
                    payload,
                    delay,
                } => Self::Reply {
                    response: response.with_header(name, value),
                    payload,
                    delay,
                },
                other => other,
            }
        }

        /// Delay the reply; other variants are returned unchanged
        #[must_use]
        pub fn with_delay(self, delay: Duration) -> Self {
            match self {
                Self::Reply {
                    response, payload, ..
                } => Self::Reply {
                    response,
                    payload,
                    delay: Some(delay),
                },
                other => other,
            }
        }
    }

    #[derive(Debug)]
    struct Script {
        queue: VecDeque<ScriptedResponse>,
        fallback: ScriptedResponse,
        requests: Vec<OutboundRequest>,
    }

    /// Scripted in-memory [`Transport`].
    ///
    /// Answers calls with the queued responses in order, then with the
    /// fallback (`200 OK` unless changed). Every request it receives is
    /// recorded, and every cancellation it honours is counted.
    ///
    /// Clones share the same script and records.
    #[derive(Clone)]
    pub struct MockTransport {
        script: Arc<Mutex<Script>>,
        cancellations: Arc<AtomicUsize>,
    }

    impl fmt::Debug for MockTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("MockTransport")
                .field("calls", &self.call_count())
                .field("cancellations", &self.cancellations())
                .finish_non_exhaustive()
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        /// Transport that answers every call with `200 OK`
        #[must_use]
        pub fn new() -> Self {
            Self::with_responses([])
        }

        /// Transport that answers with `responses` in order, then `200 OK`
        #[must_use]
        pub fn with_responses(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    queue: responses.into_iter().collect(),
                    fallback: ScriptedResponse::ok(),
                    requests: Vec::new(),
                })),
                cancellations: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Answer once the queue is exhausted with `response`
        #[must_use]
        pub fn with_fallback(self, response: ScriptedResponse) -> Self {
            self.lock().fallback = response;
            self
        }

        /// Queue another response
        pub fn push(&self, response: ScriptedResponse) {
            self.lock().queue.push_back(response);
        }

        /// Number of calls received
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.lock().requests.len()
        }

        /// Requests received, in order
        #[must_use]
        pub fn requests(&self) -> Vec<OutboundRequest> {
            self.lock().requests.clone()
        }

        /// Number of calls that ended because of cancellation
        #[must_use]
        pub fn cancellations(&self) -> usize {
            self.cancellations.load(Ordering::SeqCst)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn next(&self, request: &OutboundRequest) -> ScriptedResponse {
            let mut script = self.lock();
            script.requests.push(request.clone());
            script
                .queue
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone())
        }
    }

    impl Transport for MockTransport {
        fn perform(&self, request: OutboundRequest, cancel: CancelSignal) -> TransportFuture {
            let scripted = self.next(&request);
            let cancellations = Arc::clone(&self.cancellations);

            Box::pin(async move {
                let cancelled = |request| {
                    cancellations.fetch_add(1, Ordering::SeqCst);
                    TransportOutcome::cancelled(request)
                };

                match scripted {
                    ScriptedResponse::Reply {
                        response,
                        payload,
                        delay: None,
                    } => TransportOutcome::success(request, response, payload),
                    ScriptedResponse::Reply {
                        response,
                        payload,
                        delay: Some(delay),
                    } => {
                        tokio::select! {
                            () = cancel.cancelled() => cancelled(request),
                            () = tokio::time::sleep(delay) => {
                                TransportOutcome::success(request, response, payload)
                            }
                        }
                    },
                    ScriptedResponse::Fail(error) => TransportOutcome::failure(request, error),
                    ScriptedResponse::Hang => {
                        cancel.cancelled().await;
                        cancelled(request)
                    },
                    ScriptedResponse::Empty => TransportOutcome {
                        request: Some(request),
                        ..TransportOutcome::default()
                    },
                }
            })
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber
    ///
    /// Filtered by `RUST_LOG` and written through the test harness so output
    /// only shows for failing tests. Safe to call from every test.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, MockTransport, ScriptedResponse, test_clock};
