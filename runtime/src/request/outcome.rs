use std::fmt;
use std::sync::Arc;

use courier_core::{Bytes, CallError, OutboundRequest, ResponseMetadata};

static MISSING_RESULT: CallError = CallError::RequestFailure;

/// Everything a request ended with.
///
/// Frozen at completion and shared by every handle and callback. At most one
/// of `result` and `error` is meaningful: a request that recorded an error
/// may still carry the request description, response and payload of the
/// attempt that produced it.
pub struct Outcome<R> {
    pub(crate) request: Option<OutboundRequest>,
    pub(crate) response: Option<ResponseMetadata>,
    pub(crate) payload: Option<Bytes>,
    pub(crate) result: Option<Arc<R>>,
    pub(crate) error: Option<CallError>,
}

impl<R> Outcome<R> {
    /// The request description actually sent
    #[must_use]
    pub const fn request(&self) -> Option<&OutboundRequest> {
        self.request.as_ref()
    }

    /// Response metadata
    #[must_use]
    pub const fn response(&self) -> Option<&ResponseMetadata> {
        self.response.as_ref()
    }

    /// Raw response payload
    #[must_use]
    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Deserialized result
    #[must_use]
    pub fn result(&self) -> Option<&R> {
        self.result.as_deref()
    }

    /// Terminal error
    #[must_use]
    pub const fn error(&self) -> Option<&CallError> {
        self.error.as_ref()
    }

    /// Whether the request produced a result without an error
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// View the outcome as a `Result`
    ///
    /// # Errors
    ///
    /// Returns the recorded error, or [`CallError::RequestFailure`] if
    /// neither a result nor an error was recorded.
    pub fn as_result(&self) -> Result<&R, &CallError> {
        match (&self.error, self.result.as_deref()) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(&MISSING_RESULT),
        }
    }

    /// Take the result out of the outcome
    ///
    /// # Errors
    ///
    /// Same as [`Outcome::as_result`], by value.
    pub fn into_result(self) -> Result<Arc<R>, CallError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(CallError::RequestFailure),
        }
    }
}

impl<R> Default for Outcome<R> {
    fn default() -> Self {
        Self {
            request: None,
            response: None,
            payload: None,
            result: None,
            error: None,
        }
    }
}

impl<R> Clone for Outcome<R> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            response: self.response.clone(),
            payload: self.payload.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

impl<R> fmt::Debug for Outcome<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .field("has_result", &self.result.is_some())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_outcome_reads_as_request_failure() {
        let outcome = Outcome::<u32>::default();
        assert!(!outcome.is_success());
        assert_eq!(outcome.as_result(), Err(&CallError::RequestFailure));
    }

    #[test]
    fn error_wins_over_result() {
        let outcome = Outcome {
            result: Some(Arc::new(1_u32)),
            error: Some(CallError::RequestCancelled),
            ..Outcome::default()
        };
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.into_result().unwrap_err(),
            CallError::RequestCancelled
        );
    }

    #[test]
    fn result_is_shared_between_clones() {
        let outcome = Outcome {
            result: Some(Arc::new(String::from("ok"))),
            ..Outcome::default()
        };
        let copy = outcome.clone();
        assert!(std::ptr::eq(
            outcome.result().unwrap(),
            copy.result().unwrap()
        ));
        assert_eq!(copy.as_result(), Ok(&String::from("ok")));
    }
}
