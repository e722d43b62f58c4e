//! Periodic relay statistics.
//!
//! Reads the process-global counters and logs a one-line summary:
//! - received / emitted / discarded message counts
//! - emissions currently in flight
//! - lateness percentiles (P50/P99)

use crate::metrics::{
    EMISSIONS_DISCARDED_TOTAL, EMISSIONS_IN_FLIGHT, EMISSION_LATENESS_MS,
    EPOCH_FIELDS_REWRITTEN_TOTAL, MESSAGES_EMITTED_TOTAL, MESSAGES_RECEIVED_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use std::time::Duration;
use tracing::info;

/// Snapshot of relay counters.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayStats {
    pub received: u64,
    pub emitted: u64,
    pub discarded: u64,
    pub in_flight: i64,
    pub epoch_fields_rewritten: u64,
    pub lateness_p50_ms: f64,
    pub lateness_p99_ms: f64,
}

/// Statistics reporter.
pub struct StatsReporter {
    symbol: String,
    start_time: DateTime<Utc>,
}

impl StatsReporter {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            start_time: Utc::now(),
        }
    }

    /// Current counter values.
    pub fn get_stats(&self) -> RelayStats {
        let discarded = EMISSIONS_DISCARDED_TOTAL
            .collect()
            .iter()
            .flat_map(|mf| mf.get_metric())
            .map(|m| m.get_counter().get_value() as u64)
            .sum();

        let (lateness_p50_ms, lateness_p99_ms) = Self::lateness_percentiles();

        RelayStats {
            received: MESSAGES_RECEIVED_TOTAL.get(),
            emitted: MESSAGES_EMITTED_TOTAL.get(),
            discarded,
            in_flight: EMISSIONS_IN_FLIGHT.get(),
            epoch_fields_rewritten: EPOCH_FIELDS_REWRITTEN_TOTAL.get(),
            lateness_p50_ms,
            lateness_p99_ms,
        }
    }

    /// Estimate percentiles from histogram buckets (upper bound of the bucket
    /// containing the rank).
    fn lateness_percentiles() -> (f64, f64) {
        let families = EMISSION_LATENESS_MS.collect();
        let Some(histogram) = families
            .first()
            .and_then(|mf| mf.get_metric().first())
            .map(|m| m.get_histogram())
        else {
            return (0.0, 0.0);
        };

        let total = histogram.get_sample_count();
        if total == 0 {
            return (0.0, 0.0);
        }

        let percentile = |p: f64| -> f64 {
            let rank = (total as f64 * p).ceil() as u64;
            histogram
                .get_bucket()
                .iter()
                .find(|b| b.get_cumulative_count() >= rank)
                .map(|b| b.get_upper_bound())
                .unwrap_or(f64::INFINITY)
        };

        (percentile(0.50), percentile(0.99))
    }

    /// Log the current summary.
    pub fn output_summary(&self) {
        let stats = self.get_stats();
        let uptime_secs = (Utc::now() - self.start_time).num_seconds();
        info!(
            symbol = %self.symbol,
            uptime_secs,
            received = stats.received,
            emitted = stats.emitted,
            discarded = stats.discarded,
            in_flight = stats.in_flight,
            epoch_fields_rewritten = stats.epoch_fields_rewritten,
            lateness_p50_ms = stats.lateness_p50_ms,
            lateness_p99_ms = stats.lateness_p99_ms,
            "Relay statistics"
        );
    }

    /// Log a summary every `period` until the task is dropped.
    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.output_summary();
        }
    }
}
