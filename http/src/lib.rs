//! # Courier HTTP
//!
//! [`Transport`](courier_core::Transport) implementation over `reqwest`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use courier_http::HttpTransport;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Timeouts and user agent from COURIER_HTTP_* variables
//! let transport = Arc::new(HttpTransport::from_env()?);
//! # let _ = transport;
//! # Ok(())
//! # }
//! ```
//!
//! Cancellation is honoured at any point of the exchange: the in-flight
//! reqwest future is dropped and the outcome reports a transport failure.

pub mod client;
pub mod config;
pub mod error;

pub use client::HttpTransport;
pub use config::HttpTransportConfig;
pub use error::ConfigError;
