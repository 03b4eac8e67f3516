//! Transport capability contract.
//!
//! The request pipeline never opens sockets itself. It hands an assembled
//! [`OutboundRequest`] to a [`Transport`] together with a [`CancelSignal`]
//! and waits for the [`TransportOutcome`].
//!
//! # Cancellation
//!
//! Cancellation is cooperative. The pipeline keeps the [`CancelHandle`] half
//! of the pair and fires it when the request is cancelled; the transport is
//! expected to stop as soon as it notices and still report an outcome
//! (typically a [`CallError::TransportFailure`]). Dropping the handle counts
//! as cancellation, which is what happens when a request is abandoned.
//!
//! # Example
//!
//! ```ignore
//! struct Echo;
//!
//! impl Transport for Echo {
//!     fn perform(&self, request: OutboundRequest, cancel: CancelSignal) -> TransportFuture {
//!         Box::pin(async move {
//!             tokio::select! {
//!                 () = cancel.cancelled() => TransportOutcome::cancelled(request),
//!                 () = tokio::time::sleep(Duration::from_millis(5)) => {
//!                     let body = request.body.clone();
//!                     TransportOutcome::success(request, ResponseMetadata::new(StatusCode::OK), body)
//!                 }
//!             }
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::error::CallError;
use crate::message::{OutboundRequest, ResponseMetadata};

/// Everything the transport learned about one network call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportOutcome {
    /// The request actually sent, if it got that far
    pub request: Option<OutboundRequest>,
    /// Response metadata, if a response arrived
    pub response: Option<ResponseMetadata>,
    /// Raw response payload
    pub payload: Option<Bytes>,
    /// Transport-level failure
    pub error: Option<CallError>,
}

impl TransportOutcome {
    /// A completed exchange
    #[must_use]
    pub const fn success(
        request: OutboundRequest,
        response: ResponseMetadata,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            request: Some(request),
            response: Some(response),
            payload,
            error: None,
        }
    }

    /// A transport-level failure for the given request
    #[must_use]
    pub const fn failure(request: OutboundRequest, error: CallError) -> Self {
        Self {
            request: Some(request),
            response: None,
            payload: None,
            error: Some(error),
        }
    }

    /// The outcome a transport reports after honouring a cancellation
    #[must_use]
    pub fn cancelled(request: OutboundRequest) -> Self {
        Self::failure(request, CallError::transport("cancelled"))
    }
}

/// Boxed future returned by [`Transport::perform`].
pub type TransportFuture = Pin<Box<dyn Future<Output = TransportOutcome> + Send + 'static>>;

/// Capability that executes one network call.
///
/// Implementations must be cheap to call concurrently; the returned future is
/// spawned onto the runtime and must therefore own everything it needs.
pub trait Transport: Send + Sync {
    /// Perform the request, observing `cancel` for out-of-band cancellation
    fn perform(&self, request: OutboundRequest, cancel: CancelSignal) -> TransportFuture;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn perform(&self, request: OutboundRequest, cancel: CancelSignal) -> TransportFuture {
        (**self).perform(request, cancel)
    }
}

/// Create a connected cancellation pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Requesting side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Ask the transport to cancel the in-flight call
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observing side of a cancellation pair, handed to the transport.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation was requested (or the handle was dropped)
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancellation is requested or the handle is dropped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
