//! # Courier Core
//!
//! Core traits and types for the Courier typed request pipeline.
//!
//! This crate holds everything the request runtime needs that does not
//! execute anything by itself: the reducer/effect vocabulary the runtime is
//! built on, the outbound request description and response metadata types,
//! the transport capability contract, the error taxonomy, and the
//! process-wide clock-skew estimate.
//!
//! ## Core Concepts
//!
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`, run on a
//!   single serial context
//! - **Effect**: Description of asynchronous work whose result is fed back
//!   into the reducer as a new action
//! - **Transport**: Pluggable capability that turns an [`OutboundRequest`]
//!   into a [`TransportOutcome`], with out-of-band cancellation
//! - **`ClockSkew`**: Last-write-wins estimate of the server clock offset
//!
//! ## Example
//!
//! ```
//! use courier_core::{OutboundRequest, Method, Url};
//!
//! let url = Url::parse("https://api.example.com/users").unwrap();
//! let request = OutboundRequest::assemble(Method::GET, url, None);
//!
//! assert_eq!(request.header("content-type"), Some("charset=utf-8"));
//! ```

pub use bytes::Bytes;
pub use chrono::{DateTime, TimeDelta, Utc};
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};
pub use smallvec::{SmallVec, smallvec};
pub use url::Url;

pub mod codec;
pub mod error;
pub mod message;
pub mod server_time;
pub mod transport;

pub use error::{CallError, Result};
pub use message::{OutboundRequest, Priority, ResponseMetadata};
pub use server_time::{ClockSkew, ServerTime};
pub use transport::{CancelHandle, CancelSignal, Transport, TransportFuture, TransportOutcome};

/// Reducer module - The state machine trait
///
/// Reducers are deterministic functions of `(State, Action, Environment)`.
/// Everything asynchronous is returned as an [`Effect`](crate::effect::Effect)
/// and executed by the runtime, which feeds the resulting action back into
/// the same reducer.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for serialized state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer owns
    /// - `Action`: The messages this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for CounterReducer {
    ///     type State = CounterState;
    ///     type Action = CounterAction;
    ///     type Environment = ();
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut CounterState,
    ///         action: CounterAction,
    ///         _env: &(),
    ///     ) -> SmallVec<[Effect<CounterAction>; 4]> {
    ///         match action {
    ///             CounterAction::Increment => {
    ///                 state.count += 1;
    ///                 smallvec![Effect::None]
    ///             }
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to current state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        ///
        /// # Returns
        ///
        /// The effects to be executed by the runtime
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe asynchronous work to be performed by the runtime. They
/// are values (not execution): a reducer returns them, the runtime runs them
/// off the reducer's context and hands any produced action back to it.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Delayed action (used for retry backoff)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap a future that always yields an action
        pub fn future<F>(future: F) -> Self
        where
            F: Future<Output = Action> + Send + 'static,
        {
            Effect::Future(Box::pin(async move { Some(future.await) }))
        }

        /// Whether this effect does nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time from the operating system
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn effect_debug_hides_future() {
        let effect: Effect<u8> = Effect::future(async { 1 });
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
        assert!(!effect.is_none());
        assert!(Effect::<u8>::None.is_none());
    }

    #[tokio::test]
    async fn effect_future_yields_action() {
        let Effect::Future(fut) = Effect::future(async { 7_u8 }) else {
            panic!("expected a future effect");
        };
        assert_eq!(fut.await, Some(7));
    }
}
