// src/core/metrics.rs

//! The metrics seam: an event sink the executor reports request outcomes to.
//!
//! The driver never aggregates; it only emits. Latency is carried as whole
//! seconds plus residual nanoseconds so high-throughput consumers lose
//! nothing to floating point.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A request latency split into whole seconds and residual nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLatency {
    pub secs: u64,
    pub nanos: u32,
}

impl From<Duration> for RequestLatency {
    fn from(d: Duration) -> Self {
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

/// Everything the executor can report. Error and retry kinds mirror the
/// retry policy callbacks so sinks can build per-cause counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsEvent {
    ConnectionError,
    AuthenticationError,
    ReadTimeoutError,
    WriteTimeoutError,
    UnavailableError,
    ClientTimeoutError,
    OtherError,
    ClientTimeoutRetry,
    ReadTimeoutRetry,
    WriteTimeoutRetry,
    UnavailableRetry,
    OtherErrorRetry,
    IgnoreError,
    SpeculativeExecution,
}

/// A sink for driver telemetry. Implementations must be cheap and
/// non-blocking; they run on the request path.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn on_event(&self, event: MetricsEvent);

    /// A response was received, successful or not.
    fn on_response(&self, latency: RequestLatency);

    /// A response completed the request successfully.
    fn on_successful_response(&self, latency: RequestLatency);
}

/// The default sink: drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn on_event(&self, _event: MetricsEvent) {}
    fn on_response(&self, _latency: RequestLatency) {}
    fn on_successful_response(&self, _latency: RequestLatency) {}
}

/// Shared handle used throughout the driver.
pub type MetricsRef = Arc<dyn MetricsSink>;
