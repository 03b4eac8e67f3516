//! # Courier Runtime
//!
//! Runtime implementation for the Courier typed request pipeline.
//!
//! This crate provides the store runtime every request runs on, the
//! [`Request`] state machine itself, and the endpoint-bound [`Manager`].
//!
//! ## Core Components
//!
//! - **Store**: Single-consumer actor that owns a reducer's state and feeds
//!   effect results back into its own mailbox
//! - **Request**: Typed, configurable, retryable, cancellable unit of network
//!   work built on a store
//! - **Manager**: Factory bound to one endpoint that tracks live requests
//! - **`SerialQueue`**: Named serial context for completion handlers
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::codec::{json_body, json_result};
//! use courier_runtime::{Manager, validate};
//!
//! let users: Manager<NewUser, User> = Manager::parse("https://api.example.com/users", transport)?;
//!
//! let user = users
//!     .request(new_user, json_body, json_result)
//!     .validate(validate::success_status())
//!     .call()
//!     .wait()
//!     .await;
//! ```

/// Single-consumer store runtime
pub mod store;

/// Named serial execution contexts
pub mod queue;

/// The request state machine and its handle
pub mod request;

/// Endpoint-bound request factory
pub mod manager;

/// Retry predicates and backoff policy
pub mod retry;

/// Ready-made response validators
pub mod validate;

/// Ready-made request processors
pub mod process;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur while talking to a store or queue
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store or queue task has stopped
        ///
        /// Happens once every strong handle is gone, or when the runtime
        /// the task was spawned on has shut down.
        #[error("Store mailbox closed")]
        MailboxClosed,
    }
}

pub use error::StoreError;
pub use manager::{Manager, ManagerConfig};
pub use queue::SerialQueue;
pub use request::{Outcome, Request, RequestId, RetryContext};
pub use retry::RetryPolicy;
pub use store::{Mailbox, Store, WeakMailbox};
