//! Steady-state read loop.

use crate::emission::EmissionScheduler;
use delayer_ws::{frame_payload, upstream_error, WsError};
use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, warn};

/// Why the read loop stopped.
#[derive(Debug)]
pub enum ReadLoopExit {
    /// Peer sent a close frame.
    Closed { code: u16, reason: String },
    /// Stream ended without a close frame.
    Ended,
    /// Receive failed.
    Failed(WsError),
}

impl ReadLoopExit {
    /// The exit as a transport error, for reporting.
    pub fn into_error(self) -> WsError {
        match self {
            Self::Closed { code, reason } => WsError::ConnectionClosed { code, reason },
            Self::Ended => WsError::ConnectionClosed {
                code: 1006,
                reason: "stream ended".to_string(),
            },
            Self::Failed(e) => e,
        }
    }
}

/// Receive until the transport stops, scheduling one emission per data frame.
///
/// The next receive is issued as soon as the previous payload is scheduled;
/// pending emissions are left running when the loop exits.
pub async fn run_read_loop<S>(stream: &mut S, scheduler: &mut EmissionScheduler) -> ReadLoopExit
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((1005, "no close frame payload".to_string()));
                warn!(code, %reason, "WebSocket closed by server");
                return ReadLoopExit::Closed { code, reason };
            }
            Some(Ok(msg)) => match frame_payload(msg) {
                Some(payload) => {
                    if let Some(err) = upstream_error(&payload) {
                        warn!(error = %err, "Upstream reported an error");
                    }
                    scheduler.schedule(payload);
                }
                None => debug!("Control frame skipped"),
            },
            Some(Err(e)) => {
                let err = WsError::Read(e);
                error!(stage = err.stage(), error = %err, "Read failed");
                return ReadLoopExit::Failed(err);
            }
            None => {
                warn!("WebSocket stream ended");
                return ReadLoopExit::Ended;
            }
        }
    }
}
