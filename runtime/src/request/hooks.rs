//! Hook signatures accepted by a request.

use std::sync::Arc;

use courier_core::{Bytes, CallError, OutboundRequest, ResponseMetadata, Result};
use futures::future::BoxFuture;

use super::Request;

/// Turns parameters into the request body.
pub(crate) type Serializer<P> = Box<dyn Fn(&P) -> Result<Option<Bytes>> + Send>;

/// Turns the response into the typed result.
pub(crate) type Deserializer<P, R> =
    Box<dyn Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<R> + Send>;

/// Mutates the assembled request before it is sent.
pub(crate) type Processor = Box<dyn Fn(&mut OutboundRequest) -> Result<()> + Send>;

/// Accepts or rejects a response before deserialization.
pub(crate) type Validator<P> =
    Box<dyn Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<()> + Send>;

/// Decides whether a finished attempt should be retried.
pub(crate) type RetryCondition<P, R> =
    Arc<dyn Fn(&RetryContext<'_, P, R>) -> Result<bool> + Send + Sync>;

/// Produces the async work run at the start of every attempt.
pub(crate) type Preprocess = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send>;

/// Fire-once hook receiving the request handle.
pub(crate) type Interceptor<P, R> = Box<dyn FnOnce(&Request<P, R>) + Send>;

/// What a retry condition gets to look at.
///
/// Reflects the attempt that just finished. `attempt` is the number of
/// retries already performed, so it is `0` after the first attempt.
#[derive(Debug)]
pub struct RetryContext<'a, P, R> {
    /// Request parameters
    pub parameters: &'a P,
    /// Request description actually sent, if assembly got that far
    pub request: Option<&'a OutboundRequest>,
    /// Response metadata, if a response arrived
    pub response: Option<&'a ResponseMetadata>,
    /// Raw response payload
    pub payload: Option<&'a Bytes>,
    /// Deserialized result
    pub result: Option<&'a R>,
    /// Error recorded for the attempt
    pub error: Option<&'a CallError>,
    /// Retries performed so far
    pub attempt: u32,
}
