//! Ready-made request processors.

use courier_core::{OutboundRequest, Result};

/// Set a header on every attempt, replacing any previous value.
///
/// An illegal name or value fails the attempt with
/// [`CallError::ProcessorFailure`](courier_core::CallError::ProcessorFailure).
pub fn header(
    name: impl Into<String>,
    value: impl Into<String>,
) -> impl Fn(&mut OutboundRequest) -> Result<()> + Send + Sync + 'static {
    let name = name.into();
    let value = value.into();
    move |request| request.set_header(&name, &value)
}

/// Set a bearer token `Authorization` header on every attempt.
pub fn bearer_auth(
    token: impl Into<String>,
) -> impl Fn(&mut OutboundRequest) -> Result<()> + Send + Sync + 'static {
    header("authorization", format!("Bearer {}", token.into()))
}
