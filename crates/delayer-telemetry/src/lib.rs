//! Prometheus metrics and structured logging for feed-delayer.
//!
//! - Prometheus counters for the relay pipeline (received, emitted, discarded)
//! - Structured logging with tracing, always on stderr
//! - Periodic statistics summary

pub mod error;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use stats::{RelayStats, StatsReporter};
