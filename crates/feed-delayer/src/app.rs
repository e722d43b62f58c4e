//! Session orchestration.
//!
//! One session per process: handshake, subscribe once, then run the read
//! loop until the transport stops or a shutdown signal arrives. What happens
//! after the transport stops is governed by `FailurePolicy`.

use crate::config::{AppConfig, FailurePolicy};
use crate::error::{AppError, AppResult};
use delayer_relay::{
    run_read_loop, EmissionScheduler, OutputSink, ReadLoopExit, RelayError, RelayResult,
};
use delayer_telemetry::StatsReporter;
use delayer_ws::{send_subscription, HandshakeSequencer, TicksRequest, WsError, WsStream};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// Aborts the wrapped background task when dropped.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// A single relay session.
pub struct Session {
    config: AppConfig,
    delay_secs: u64,
    symbol: String,
}

impl Session {
    pub fn new(config: AppConfig, delay_secs: u64, symbol: impl Into<String>) -> AppResult<Self> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(AppError::Config("symbol must not be empty".to_string()));
        }
        config.validate()?;
        Ok(Self {
            config,
            delay_secs,
            symbol,
        })
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Relay to stdout until Ctrl-C or transport loss.
    pub async fn run(self) -> AppResult<()> {
        self.run_with(tokio::io::stdout(), shutdown_signal()).await
    }

    /// Relay to `writer` until `shutdown` resolves or the transport is lost.
    ///
    /// Returns `Ok` on shutdown. On transport loss the result depends on the
    /// failure policy: `Exit` returns the transport error once pending
    /// emissions have fired, `Stall` waits for `shutdown` instead. A failed
    /// output write ends the session at once with the write error, whatever
    /// the policy.
    pub async fn run_with<W, F>(self, writer: W, shutdown: F) -> AppResult<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(delay_secs = self.delay_secs, symbol = %self.symbol, "Delay time {} sec.", self.delay_secs);

        let _stats = AbortOnDrop(self.spawn_stats());

        let sequencer = HandshakeSequencer::new(self.config.connection_config());
        let established = tokio::select! {
            result = sequencer.establish() => Some(result),
            () = &mut shutdown => None,
        };
        let mut ws = match established {
            Some(Ok(ws)) => ws,
            // Reported by the sequencer.
            Some(Err(e)) => return self.after_transport_loss(e, shutdown).await,
            None => {
                info!("Shutdown signal received during handshake");
                return Ok(());
            }
        };

        let request = TicksRequest::new(self.symbol.as_str());
        if let Err(e) = send_subscription(&mut ws, &request).await {
            error!(stage = e.stage(), error = %e, "Subscription failed");
            return self.after_transport_loss(e, shutdown).await;
        }
        info!("Connection established. Waiting for information...");

        let (sink, mut sink_task) = OutputSink::spawn(writer);
        let mut scheduler = EmissionScheduler::new(self.delay_secs, sink);

        let stopped = tokio::select! {
            exit = run_read_loop(&mut ws, &mut scheduler) => Stopped::ReadLoop(exit),
            result = &mut sink_task => Stopped::Sink(result),
            () = &mut shutdown => Stopped::Shutdown,
        };

        let exit = match stopped {
            Stopped::ReadLoop(exit) => exit,
            Stopped::Shutdown => {
                info!("Shutdown signal received");
                let abandoned = scheduler.abandon().await;
                info!(abandoned = abandoned.discarded, "Pending emissions abandoned");
                drop(scheduler);
                close_quietly(&mut ws).await;
                return finish_sink(sink_task).await;
            }
            Stopped::Sink(result) => {
                // The scheduler still holds a handle, so the sink only stops on failure.
                let err = sink_failure(result);
                error!(error = %err, "Output lost, ending session");
                let abandoned = scheduler.abandon().await;
                info!(abandoned = abandoned.discarded, "Pending emissions abandoned");
                close_quietly(&mut ws).await;
                return Err(err);
            }
        };

        // Already scheduled emissions still fire.
        info!(
            in_flight = scheduler.in_flight(),
            "Read loop stopped, waiting for pending emissions"
        );
        let drained = tokio::select! {
            summary = scheduler.drain() => Some(summary),
            () = &mut shutdown => None,
        };
        match drained {
            Some(summary) => info!(emitted = summary.emitted, "Pending emissions flushed"),
            None => {
                info!("Shutdown signal received while draining");
                scheduler.abandon().await;
                drop(scheduler);
                return finish_sink(sink_task).await;
            }
        }
        drop(scheduler);
        finish_sink(sink_task).await?;

        self.after_transport_loss(exit.into_error(), shutdown).await
    }

    fn spawn_stats(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.telemetry.stats_interval_secs;
        (interval > 0).then(|| {
            tokio::spawn(
                StatsReporter::new(self.symbol.as_str()).run(Duration::from_secs(interval)),
            )
        })
    }

    async fn after_transport_loss<F>(&self, err: WsError, shutdown: Pin<&mut F>) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        match self.config.on_transport_failure {
            FailurePolicy::Exit => Err(err.into()),
            FailurePolicy::Stall => {
                warn!(
                    stage = err.stage(),
                    "Transport lost, staying idle until interrupted (on_transport_failure = stall)"
                );
                shutdown.await;
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

/// What ended the steady state.
enum Stopped<W> {
    ReadLoop(ReadLoopExit),
    Sink(Result<RelayResult<W>, JoinError>),
    Shutdown,
}

/// Wait for the output writer to flush everything it was handed.
async fn finish_sink<W>(task: JoinHandle<RelayResult<W>>) -> AppResult<()> {
    match task.await {
        Ok(Ok(_writer)) => Ok(()),
        other => Err(sink_failure(other)),
    }
}

/// Error for a sink task that stopped while emissions could still arrive.
fn sink_failure<W>(result: Result<RelayResult<W>, JoinError>) -> AppError {
    match result {
        Ok(Ok(_writer)) => RelayError::SinkClosed.into(),
        Ok(Err(e)) => e.into(),
        Err(e) => AppError::Task(format!("output sink: {e}")),
    }
}

async fn close_quietly(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        warn!(error = %e, "Failed to send Close frame");
    }
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
