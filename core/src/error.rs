//! Error taxonomy for the request pipeline.
//!
//! Every failure a request can end with is a [`CallError`]. Hooks supplied by
//! callers (serializers, processors, validators, deserializers, retry
//! conditions) report failures with the same type, usually through one of
//! the constructor helpers that accept any `Display` value.

use std::fmt::Display;

use thiserror::Error;

/// Errors that can terminate a request attempt.
///
/// All variants are terminal for the current attempt. Only a retry condition
/// answering `true` restarts the pipeline, which clears the recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The endpoint string could not be parsed as a URL
    #[error("Illegal URL string: {0}")]
    IllegalUrl(String),

    /// Serializer failed to encode the parameters
    #[error("Serialization failed: {0}")]
    SerializeFailure(String),

    /// Deserializer failed to decode the response
    #[error("Deserialization failed: {0}")]
    DeserializeFailure(String),

    /// A request processor failed while mutating the outbound request
    #[error("Request processor failed: {0}")]
    ProcessorFailure(String),

    /// The transport reported a failure (connection, TLS, cancellation, ...)
    #[error("Transport failed: {0}")]
    TransportFailure(String),

    /// The transport finished without a request description or response
    #[error("Request failure")]
    RequestFailure,

    /// A validator rejected the response
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// The request was cancelled before a network outcome was available
    #[error("Request cancelled")]
    RequestCancelled,

    /// A retry condition failed while deciding whether to retry
    #[error("Retry condition failed: {0}")]
    RetryConditionFailure(String),
}

impl CallError {
    /// Build a [`CallError::SerializeFailure`] from any displayable error
    pub fn serialize(error: impl Display) -> Self {
        Self::SerializeFailure(error.to_string())
    }

    /// Build a [`CallError::DeserializeFailure`] from any displayable error
    pub fn deserialize(error: impl Display) -> Self {
        Self::DeserializeFailure(error.to_string())
    }

    /// Build a [`CallError::ProcessorFailure`] from any displayable error
    pub fn processor(error: impl Display) -> Self {
        Self::ProcessorFailure(error.to_string())
    }

    /// Build a [`CallError::TransportFailure`] from any displayable error
    pub fn transport(error: impl Display) -> Self {
        Self::TransportFailure(error.to_string())
    }

    /// Build a [`CallError::ValidationFailure`] from any displayable error
    pub fn validation(error: impl Display) -> Self {
        Self::ValidationFailure(error.to_string())
    }

    /// Build a [`CallError::RetryConditionFailure`] from any displayable error
    pub fn retry_condition(error: impl Display) -> Self {
        Self::RetryConditionFailure(error.to_string())
    }

    /// Whether this is the pipeline's own cancellation error
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::RequestCancelled)
    }

    /// Whether the failure came from the transport
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

/// Result type alias using [`CallError`].
pub type Result<T, E = CallError> = std::result::Result<T, E>;
