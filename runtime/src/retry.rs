//! Retry predicates and backoff between attempts.
//!
//! Whether a finished attempt is retried is decided by retry conditions
//! registered with [`Request::retry`](crate::request::Request::retry). The
//! functions here build the common ones. How long to wait before the next
//! attempt is decided separately by a [`RetryPolicy`] passed to
//! [`Request::backoff`](crate::request::Request::backoff); without one the
//! next attempt starts immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_runtime::retry::{self, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .jitter(true)
//!     .build();
//!
//! request
//!     .retry(retry::on_transport_failure(5))
//!     .retry(retry::on_status([StatusCode::SERVICE_UNAVAILABLE], 5))
//!     .backoff(policy);
//! ```

use std::collections::HashSet;
use std::time::Duration;

use courier_core::{Result, StatusCode};
use rand::Rng;

use crate::request::RetryContext;

/// Backoff configuration between attempts.
///
/// # Default Values
///
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: off
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: false,
        }
    }

    /// Calculate delay before retry number `attempt + 1`.
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`, then jittered if enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max = self.max_delay.as_secs_f64();
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_nan() { max } else { raw.clamp(0.0, max) };
        let delay = Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay);

        if self.jitter {
            rand::thread_rng().gen_range(delay / 2..=delay)
        } else {
            delay
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter,
        }
    }
}

/// Retry any failed attempt, up to `max_retries` times.
pub fn on_any_error<P: 'static, R: 'static>(
    max_retries: u32,
) -> impl Fn(&RetryContext<'_, P, R>) -> Result<bool> + Send + Sync + 'static {
    move |context| Ok(context.error.is_some() && context.attempt < max_retries)
}

/// Retry attempts that failed in the transport, up to `max_retries` times.
pub fn on_transport_failure<P: 'static, R: 'static>(
    max_retries: u32,
) -> impl Fn(&RetryContext<'_, P, R>) -> Result<bool> + Send + Sync + 'static {
    move |context| {
        Ok(context.error.is_some_and(courier_core::CallError::is_transport)
            && context.attempt < max_retries)
    }
}

/// Retry attempts whose response status is one of `statuses`, up to
/// `max_retries` times.
pub fn on_status<P: 'static, R: 'static>(
    statuses: impl IntoIterator<Item = StatusCode>,
    max_retries: u32,
) -> impl Fn(&RetryContext<'_, P, R>) -> Result<bool> + Send + Sync + 'static {
    let statuses: HashSet<StatusCode> = statuses.into_iter().collect();
    move |context| {
        Ok(context
            .response
            .is_some_and(|response| statuses.contains(&response.status))
            && context.attempt < max_retries)
    }
}
