//! Prometheus metrics for observability and monitoring.
//!
//! Metrics are always recorded through the `metrics` facade and cost next to
//! nothing when no recorder is installed. [`MetricsServer`] installs a
//! Prometheus recorder and renders the text exposition:
//!
//! - request lifecycle (dispatch, attempts, retries, completion, cancellation)
//! - request duration from `call` to completion
//! - live requests per manager
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // ... run requests ...
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder with text rendering.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// `addr` is where the embedding application serves the rendered text;
    /// it is only used for logging here.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this
    /// logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "courier_requests_dispatched_total",
        "Total number of requests called"
    );
    describe_counter!(
        "courier_request_attempts_total",
        "Total number of attempts started, including retries"
    );
    describe_counter!(
        "courier_request_retries_total",
        "Total number of retries started"
    );
    describe_counter!(
        "courier_requests_completed_total",
        "Total number of completed requests by outcome"
    );
    describe_counter!(
        "courier_requests_cancelled_total",
        "Total number of cancelled requests"
    );
    describe_histogram!(
        "courier_request_duration_seconds",
        "Time from call to completion"
    );
    describe_gauge!(
        "courier_manager_live_requests",
        "Requests currently tracked by managers"
    );
}

/// Request lifecycle metrics recorder.
pub struct RequestMetrics;

impl RequestMetrics {
    /// Record a request being called.
    pub fn record_dispatch() {
        counter!("courier_requests_dispatched_total").increment(1);
    }

    /// Record an attempt starting.
    pub fn record_attempt() {
        counter!("courier_request_attempts_total").increment(1);
    }

    /// Record a retry being scheduled.
    pub fn record_retry() {
        counter!("courier_request_retries_total").increment(1);
    }

    /// Record a cancellation taking effect.
    pub fn record_cancel() {
        counter!("courier_requests_cancelled_total").increment(1);
    }

    /// Record a completion.
    ///
    /// `duration` is `None` for requests completed without ever being called.
    pub fn record_completion(outcome: &'static str, duration: Option<Duration>) {
        counter!("courier_requests_completed_total", "outcome" => outcome).increment(1);
        if let Some(duration) = duration {
            histogram!("courier_request_duration_seconds").record(duration.as_secs_f64());
        }
    }
}

/// Manager metrics recorder.
///
/// The live gauge is labelled by endpoint and moved by deltas, so managers
/// never overwrite each other's counts.
pub struct ManagerMetrics;

impl ManagerMetrics {
    /// Record requests joining a manager's live set.
    pub fn record_joined(endpoint: &str, count: usize) {
        // Note: Precision loss acceptable for metrics (counts < 2^52)
        #[allow(clippy::cast_precision_loss)]
        gauge!("courier_manager_live_requests", "endpoint" => endpoint.to_owned())
            .increment(count as f64);
    }

    /// Record requests leaving a manager's live set.
    pub fn record_left(endpoint: &str, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("courier_manager_live_requests", "endpoint" => endpoint.to_owned())
            .decrement(count as f64);
    }
}
