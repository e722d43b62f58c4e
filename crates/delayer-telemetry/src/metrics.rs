//! Prometheus metrics for the feed relay.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means duplicate
//! metric names, which is a startup configuration error. These panics only
//! occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Handshake sequencer current state.
/// Labels: state (idle/resolving/connecting/tls_handshaking/protocol_handshaking/ready/failed)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "feed_delayer_ws_state",
        "Handshake sequencer current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total inbound data messages.
pub static MESSAGES_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_delayer_messages_received_total",
        "Inbound data messages handed to the scheduler"
    )
    .unwrap()
});

/// Total lines written to the output stream.
pub static MESSAGES_EMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_delayer_messages_emitted_total",
        "Delayed messages written to the output stream"
    )
    .unwrap()
});

/// Delayed emissions dropped without output.
/// Labels: reason (cancelled/sink_closed/task_failed)
pub static EMISSIONS_DISCARDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_delayer_emissions_discarded_total",
        "Delayed emissions discarded without output",
        &["reason"]
    )
    .unwrap()
});

/// Emissions currently waiting on their timer.
pub static EMISSIONS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "feed_delayer_emissions_in_flight",
        "Delayed emissions waiting for expiry"
    )
    .unwrap()
});

/// How late an emission fired relative to its deadline.
pub static EMISSION_LATENESS_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "feed_delayer_emission_lateness_ms",
        "Milliseconds between an emission's deadline and its actual firing",
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Epoch fields advanced by the rewriter.
pub static EPOCH_FIELDS_REWRITTEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_delayer_epoch_fields_rewritten_total",
        "Epoch fields advanced by the configured delay"
    )
    .unwrap()
});

const WS_STATES: &[&str] = &[
    "idle",
    "resolving",
    "connecting",
    "tls_handshaking",
    "protocol_handshaking",
    "ready",
    "failed",
];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set handshake state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record an inbound message and its new emission.
    pub fn message_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
        EMISSIONS_IN_FLIGHT.inc();
    }

    /// Record an emission leaving the timer stage, either way.
    pub fn emission_settled() {
        EMISSIONS_IN_FLIGHT.dec();
    }

    /// Record a line written to the output stream.
    pub fn message_emitted() {
        MESSAGES_EMITTED_TOTAL.inc();
    }

    /// Record a discarded emission.
    pub fn emission_discarded(reason: &str) {
        EMISSIONS_DISCARDED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record emission lateness past its deadline.
    pub fn emission_lateness(lateness_ms: f64) {
        EMISSION_LATENESS_MS.observe(lateness_ms);
    }

    /// Record epoch fields rewritten in one message.
    pub fn epoch_fields_rewritten(count: u64) {
        EPOCH_FIELDS_REWRITTEN_TOTAL.inc_by(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_state_single_active() {
        Metrics::ws_state_set("connecting");
        Metrics::ws_state_set("ready");
        assert_eq!(WS_STATE.with_label_values(&["ready"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["connecting"]).get(), 0.0);
    }

    #[test]
    fn test_discarded_by_reason() {
        let before = EMISSIONS_DISCARDED_TOTAL
            .with_label_values(&["cancelled"])
            .get();
        Metrics::emission_discarded("cancelled");
        let after = EMISSIONS_DISCARDED_TOTAL
            .with_label_values(&["cancelled"])
            .get();
        assert_eq!(after, before + 1);
    }
}
