//! Error types for the HTTP transport

use thiserror::Error;

/// Errors that can occur while configuring the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidVar {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// The underlying HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
