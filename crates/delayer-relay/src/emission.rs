//! Delayed emissions and their scheduler.
//!
//! Every received message becomes one `DelayedEmission` running as its own
//! task: it sleeps until `received_at + delay`, rewrites its payload and hands
//! the line to the output sink. The scheduler owns all emission tasks in a
//! `JoinSet`, so pending emissions can be drained or abandoned explicitly.
//!
//! Emission timers are independent and may fire concurrently on different
//! workers. Receipt order is restored by the sink: each emission owns the
//! sink slot matching its sequence number, and lines are released by slot.

use crate::error::RelayError;
use crate::rewrite::rewrite_epochs;
use crate::sink::{SinkHandle, SinkSlot};
use delayer_telemetry::Metrics;
use std::borrow::Cow;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Deadline used when `received_at + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How an emission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionOutcome {
    /// Rewritten payload handed to the sink.
    Emitted,
    /// Timer cancelled before expiry; no output.
    Cancelled,
    /// Timer expired but the sink was gone; no output.
    SinkClosed,
}

/// One received message waiting out the delay.
#[derive(Debug)]
pub struct DelayedEmission {
    seq: u64,
    payload: Vec<u8>,
    delay_secs: u64,
    received_at: Instant,
}

impl DelayedEmission {
    /// Create an emission; the delay counts from now.
    pub fn new(seq: u64, payload: Vec<u8>, delay_secs: u64) -> Self {
        Self {
            seq,
            payload,
            delay_secs,
            received_at: Instant::now(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn deadline(&self) -> Instant {
        self.received_at
            .checked_add(Duration::from_secs(self.delay_secs))
            .unwrap_or_else(|| self.received_at + FAR_FUTURE)
    }

    /// Rewritten output line and the number of fields advanced.
    pub fn into_line(self) -> (Vec<u8>, u64) {
        let (rewritten, fields) = {
            let rewritten = rewrite_epochs(&self.payload, self.delay_secs);
            let owned = match rewritten.bytes {
                Cow::Owned(bytes) => Some(bytes),
                Cow::Borrowed(_) => None,
            };
            (owned, rewritten.fields)
        };
        (rewritten.unwrap_or(self.payload), fields)
    }

    /// Wait for expiry, then fill `slot`. Cancelling `shutdown` first discards
    /// the payload and settles the slot empty.
    pub async fn run(self, slot: SinkSlot, shutdown: CancellationToken) -> EmissionOutcome {
        let seq = self.seq;
        let deadline = self.deadline();

        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                Metrics::emission_settled();
                Metrics::emission_discarded("cancelled");
                error!(seq, error = %RelayError::TimerCancelled, "timer");
                return EmissionOutcome::Cancelled;
            }
            () = tokio::time::sleep_until(deadline) => {}
        }

        Metrics::emission_settled();
        let lateness = Instant::now().saturating_duration_since(deadline);
        Metrics::emission_lateness(lateness.as_secs_f64() * 1000.0);

        let (line, fields) = self.into_line();
        Metrics::epoch_fields_rewritten(fields);

        match slot.fill(line) {
            Ok(()) => EmissionOutcome::Emitted,
            Err(e) => {
                Metrics::emission_discarded("sink_closed");
                error!(seq, error = %e, "Delayed output dropped");
                EmissionOutcome::SinkClosed
            }
        }
    }
}

/// Counts of emissions settled by a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub emitted: usize,
    pub discarded: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: Option<EmissionOutcome>) {
        match outcome {
            Some(EmissionOutcome::Emitted) => self.emitted += 1,
            _ => self.discarded += 1,
        }
    }
}

/// Owns every in-flight emission of a session.
pub struct EmissionScheduler {
    delay_secs: u64,
    sink: SinkHandle,
    shutdown: CancellationToken,
    inflight: JoinSet<EmissionOutcome>,
    next_seq: u64,
}

impl EmissionScheduler {
    pub fn new(delay_secs: u64, sink: SinkHandle) -> Self {
        Self {
            delay_secs,
            sink,
            shutdown: CancellationToken::new(),
            inflight: JoinSet::new(),
            next_seq: 0,
        }
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    /// Emission tasks not yet joined.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Start a delayed emission for `payload` and return its sequence number.
    ///
    /// Never waits: the emission runs as its own task, even with zero delay.
    pub fn schedule(&mut self, payload: Vec<u8>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let emission = DelayedEmission::new(seq, payload, self.delay_secs);
        Metrics::message_received();
        debug!(seq, delay_secs = self.delay_secs, "Information received and delayed...");

        let slot = self.sink.reserve(seq);
        self.inflight
            .spawn(emission.run(slot, self.shutdown.clone()));
        self.reap();
        seq
    }

    /// Join emissions that already finished, keeping the registry small.
    fn reap(&mut self) {
        while let Some(result) = self.inflight.try_join_next() {
            settle(result);
        }
    }

    /// Wait for every pending emission to fire.
    pub async fn drain(&mut self) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Some(result) = self.inflight.join_next().await {
            summary.record(settle(result));
        }
        debug!(?summary, "Emissions drained");
        summary
    }

    /// Cancel every pending timer; their payloads produce no output.
    pub async fn abandon(&mut self) -> DrainSummary {
        self.shutdown.cancel();
        self.drain().await
    }
}

fn settle(result: Result<EmissionOutcome, JoinError>) -> Option<EmissionOutcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            Metrics::emission_settled();
            Metrics::emission_discarded("task_failed");
            error!(error = %RelayError::TaskFailed(e.to_string()), "timer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputSink;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_equal_delay() {
        let (writer, reader) = tokio::io::duplex(4096);
        let (sink, sink_task) = OutputSink::spawn(writer);
        let mut scheduler = EmissionScheduler::new(3, sink);
        let start = Instant::now();

        scheduler.schedule(br#"{"epoch":100,"n":1}"#.to_vec());
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.schedule(br#"{"epoch":101,"n":2}"#.to_vec());

        let mut lines = BufReader::new(reader).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, r#"{"epoch":103,"n":1}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let second = lines.next_line().await.unwrap().unwrap();
        assert_eq!(second, r#"{"epoch":104,"n":2}"#);
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        let summary = scheduler.drain().await;
        assert_eq!(summary.emitted, 2);
        drop(scheduler);
        sink_task.await.unwrap().unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_keeps_receipt_order_across_workers() {
        let (sink, sink_task) = OutputSink::spawn(Vec::new());
        let mut scheduler = EmissionScheduler::new(1, sink);

        // Same-millisecond deadlines fire on different workers.
        for n in 0..2000u64 {
            scheduler.schedule(format!("{{\"n\":{n}}}").into_bytes());
        }
        let summary = scheduler.drain().await;
        assert_eq!(summary.emitted, 2000);
        drop(scheduler);

        let out = String::from_utf8(sink_task.await.unwrap().unwrap()).unwrap();
        let order: Vec<u64> = out
            .lines()
            .map(|line| line[5..line.len() - 1].parse().unwrap())
            .collect();
        assert_eq!(order, (0..2000).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_emission_does_not_block_later_lines() {
        let (sink, sink_task) = OutputSink::spawn(Vec::new());
        let early = DelayedEmission::new(0, br#"{"epoch":1}"#.to_vec(), 60);
        let late = DelayedEmission::new(1, br#"{"epoch":2}"#.to_vec(), 1);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let first = early.run(sink.reserve(0), cancelled).await;
        let second = late.run(sink.reserve(1), CancellationToken::new()).await;
        assert_eq!(first, EmissionOutcome::Cancelled);
        assert_eq!(second, EmissionOutcome::Emitted);
        drop(sink);

        let out = sink_task.await.unwrap().unwrap();
        assert_eq!(out, b"{\"epoch\":3}\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_not_synchronous() {
        let (sink, sink_task) = OutputSink::spawn(Vec::new());
        let mut scheduler = EmissionScheduler::new(0, sink);

        scheduler.schedule(br#"{"epoch":5}"#.to_vec());
        // Nothing has run yet: the emission is a separate task.
        assert_eq!(scheduler.in_flight(), 1);

        let summary = scheduler.drain().await;
        assert_eq!(summary, DrainSummary { emitted: 1, discarded: 0 });
        drop(scheduler);

        let out = sink_task.await.unwrap().unwrap();
        assert_eq!(out, b"{\"epoch\":5}\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_discards_pending() {
        let (sink, sink_task) = OutputSink::spawn(Vec::new());
        let mut scheduler = EmissionScheduler::new(60, sink);

        scheduler.schedule(b"a".to_vec());
        scheduler.schedule(b"b".to_vec());
        tokio::time::sleep(Duration::from_secs(10)).await;

        let summary = scheduler.abandon().await;
        assert_eq!(summary, DrainSummary { emitted: 0, discarded: 2 });
        drop(scheduler);

        let out = sink_task.await.unwrap().unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_sink_discards() {
        let (sink, sink_task) = OutputSink::spawn(Vec::new());
        sink_task.abort();
        assert!(sink_task.await.unwrap_err().is_cancelled());

        let mut scheduler = EmissionScheduler::new(1, sink);
        scheduler.schedule(b"x".to_vec());

        let summary = scheduler.drain().await;
        assert_eq!(summary, DrainSummary { emitted: 0, discarded: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_numbers_increase() {
        let (sink, _sink_task) = OutputSink::spawn(Vec::new());
        let mut scheduler = EmissionScheduler::new(1, sink);
        assert_eq!(scheduler.schedule(b"a".to_vec()), 0);
        assert_eq!(scheduler.schedule(b"b".to_vec()), 1);
        assert_eq!(scheduler.delay_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_deadline_does_not_overflow() {
        let emission = DelayedEmission::new(0, b"x".to_vec(), u64::MAX);
        assert!(emission.deadline() > Instant::now() + Duration::from_secs(86_400));
    }

    #[test]
    fn test_into_line_reuses_unchanged_payload() {
        let emission = DelayedEmission::new(0, br#"{"status":"ok"}"#.to_vec(), 10);
        assert_eq!(emission.payload(), br#"{"status":"ok"}"#);
        let (line, fields) = emission.into_line();
        assert_eq!(line, br#"{"status":"ok"}"#);
        assert_eq!(fields, 0);
    }
}
