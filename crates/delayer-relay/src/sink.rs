//! Output sink.
//!
//! All emissions funnel into one writer task through an unbounded channel.
//! That task is the only owner of the output stream, so lines are written
//! whole.
//!
//! Every emission owns one sequence slot, numbered from 0 in receipt order.
//! Lines are released strictly by slot: a line that arrives early is held
//! until every earlier slot has been settled, either with a line (`emit`) or
//! without one (`skip`). Emission tasks racing on different workers therefore
//! cannot reorder the output.

use crate::error::{RelayError, RelayResult};
use delayer_telemetry::Metrics;
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// One settled slot; `None` settles it without output.
#[derive(Debug)]
struct OutputLine {
    seq: u64,
    bytes: Option<Vec<u8>>,
}

/// Cloneable sender side of the sink.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl SinkHandle {
    /// Settle slot `seq` with a line. Fails only when the writer task has stopped.
    pub fn emit(&self, seq: u64, bytes: Vec<u8>) -> RelayResult<()> {
        self.settle(seq, Some(bytes))
    }

    /// Settle slot `seq` without output, releasing the lines queued behind it.
    pub fn skip(&self, seq: u64) -> RelayResult<()> {
        self.settle(seq, None)
    }

    fn settle(&self, seq: u64, bytes: Option<Vec<u8>>) -> RelayResult<()> {
        self.tx
            .send(OutputLine { seq, bytes })
            .map_err(|_| RelayError::SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Take ownership of slot `seq`.
    pub fn reserve(&self, seq: u64) -> SinkSlot {
        SinkSlot {
            seq,
            sink: self.clone(),
            settled: false,
        }
    }
}

/// One sequence slot, owned by one emission.
///
/// Dropping an unfilled slot settles it as skipped, so a cancelled, failed or
/// aborted emission never holds back the lines behind it.
#[derive(Debug)]
pub struct SinkSlot {
    seq: u64,
    sink: SinkHandle,
    settled: bool,
}

impl SinkSlot {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Settle the slot with a line.
    pub fn fill(mut self, bytes: Vec<u8>) -> RelayResult<()> {
        self.settled = true;
        self.sink.emit(self.seq, bytes)
    }
}

impl Drop for SinkSlot {
    fn drop(&mut self) {
        if !self.settled {
            // A closed sink has nothing left to release.
            let _ = self.sink.skip(self.seq);
        }
    }
}

/// Single-writer output task.
pub struct OutputSink<W> {
    writer: W,
    rx: mpsc::UnboundedReceiver<OutputLine>,
    next_seq: u64,
    held: BTreeMap<u64, Option<Vec<u8>>>,
}

impl<W> OutputSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Start the writer task.
    ///
    /// The task ends once every `SinkHandle` is dropped and the queue is
    /// drained, returning the writer. A write error stops it early.
    pub fn spawn(writer: W) -> (SinkHandle, JoinHandle<RelayResult<W>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            writer,
            rx,
            next_seq: 0,
            held: BTreeMap::new(),
        };
        (SinkHandle { tx }, tokio::spawn(sink.run()))
    }

    async fn run(mut self) -> RelayResult<W> {
        while let Some(line) = self.rx.recv().await {
            if line.seq < self.next_seq {
                warn!(seq = line.seq, "Slot already settled, line dropped");
                continue;
            }
            self.held.insert(line.seq, line.bytes);

            while let Some(bytes) = self.held.remove(&self.next_seq) {
                let seq = self.next_seq;
                self.next_seq += 1;
                if let Some(bytes) = bytes {
                    self.write(seq, &bytes).await?;
                }
            }
        }

        // Every handle is gone, so the missing slots can never settle.
        if !self.held.is_empty() {
            warn!(
                next_seq = self.next_seq,
                held = self.held.len(),
                "Unsettled slots at close, flushing held lines"
            );
            let held = std::mem::take(&mut self.held);
            for (seq, bytes) in held {
                if let Some(bytes) = bytes {
                    self.write(seq, &bytes).await?;
                }
            }
        }
        Ok(self.writer)
    }

    async fn write(&mut self, seq: u64, bytes: &[u8]) -> RelayResult<()> {
        if let Err(e) = self.write_line(bytes).await {
            error!(seq, error = %e, "Output write failed");
            return Err(e.into());
        }
        Metrics::message_emitted();
        debug!(seq, len = bytes.len(), "Line written");
        Ok(())
    }

    async fn write_line(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}
