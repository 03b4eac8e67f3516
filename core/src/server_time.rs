//! Server clock-skew estimate.
//!
//! Responses carry the server's `Date` header. Each usable timestamp
//! overwrites the current estimate of how far the server clock is ahead of
//! (positive offset) or behind (negative offset) the local clock. There is
//! no averaging and no staleness check: the last writer wins.
//!
//! # Example
//!
//! ```
//! use courier_core::{ClockSkew, ServerTime, TimeDelta};
//!
//! let skew = ClockSkew::new();
//! skew.update(ServerTime::with_offset(TimeDelta::seconds(3)));
//! assert_eq!(skew.estimate().offset(), TimeDelta::seconds(3));
//! ```

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};

use crate::environment::{Clock, SystemClock};

static SHARED: LazyLock<Arc<ClockSkew>> = LazyLock::new(|| Arc::new(ClockSkew::new()));

/// One estimate of the server clock offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTime {
    offset: TimeDelta,
    captured_at: DateTime<Utc>,
}

impl ServerTime {
    /// Estimate with an explicit offset and capture time
    #[must_use]
    pub const fn new(offset: TimeDelta, captured_at: DateTime<Utc>) -> Self {
        Self {
            offset,
            captured_at,
        }
    }

    /// Estimate with the given offset, captured now
    #[must_use]
    pub fn with_offset(offset: TimeDelta) -> Self {
        Self::new(offset, Utc::now())
    }

    /// Derive an estimate from a server timestamp observed at `clock.now()`
    #[must_use]
    pub fn from_server_date(server_date: DateTime<Utc>, clock: &dyn Clock) -> Self {
        let local = clock.now();
        Self::new(server_date - local, local)
    }

    /// Server time minus local time
    #[must_use]
    pub const fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// Local time at which the estimate was taken
    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Estimated server time according to `clock`
    #[must_use]
    pub fn now_with(&self, clock: &dyn Clock) -> DateTime<Utc> {
        clock.now() + self.offset
    }

    /// Estimated current server time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now_with(&SystemClock)
    }

    /// Estimated server time `interval` from now
    #[must_use]
    pub fn date_since_now(&self, interval: TimeDelta) -> DateTime<Utc> {
        self.now() + interval
    }
}

impl Default for ServerTime {
    fn default() -> Self {
        Self::with_offset(TimeDelta::zero())
    }
}

/// Shared, overwrite-only holder of the current [`ServerTime`].
///
/// Reads and writes may come from any thread. Writes are rare (at most one
/// per completed response), so a reader/writer lock is sufficient.
#[derive(Debug, Default)]
pub struct ClockSkew {
    current: RwLock<ServerTime>,
}

impl ClockSkew {
    /// Tracker starting at zero offset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide tracker
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Current estimate
    #[must_use]
    pub fn estimate(&self) -> ServerTime {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current offset
    #[must_use]
    pub fn offset(&self) -> TimeDelta {
        self.estimate().offset()
    }

    /// Estimated current server time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.estimate().now()
    }

    /// Overwrite the estimate unconditionally
    pub fn update(&self, estimate: ServerTime) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = estimate;
    }

    /// Derive an estimate from a server timestamp and overwrite with it
    pub fn observe(&self, server_date: DateTime<Utc>, clock: &dyn Clock) -> ServerTime {
        let estimate = ServerTime::from_server_date(server_date, clock);
        self.update(estimate);
        estimate
    }
}
