//! Ready-made response validators.

use courier_core::{Bytes, CallError, OutboundRequest, ResponseMetadata, Result, StatusCode};

/// Accept only 2xx responses.
pub fn success_status<P: 'static>()
-> impl Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<()> + Send + Sync + 'static
{
    |_, _, response, _| {
        if response.status.is_success() {
            Ok(())
        } else {
            Err(CallError::validation(format!(
                "unexpected status {}",
                response.status
            )))
        }
    }
}

/// Accept only responses with exactly `expected` status.
pub fn status<P: 'static>(
    expected: StatusCode,
) -> impl Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<()> + Send + Sync + 'static
{
    move |_, _, response, _| {
        if response.status == expected {
            Ok(())
        } else {
            Err(CallError::validation(format!(
                "expected status {expected}, got {}",
                response.status
            )))
        }
    }
}
