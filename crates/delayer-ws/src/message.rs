//! Feed message types and frame helpers.

use crate::error::{WsError, WsResult};
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::info;

/// Tick stream subscription request: `{"ticks":"<symbol>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicksRequest {
    pub ticks: String,
}

impl TicksRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            ticks: symbol.into(),
        }
    }

    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Write the subscription request once.
pub async fn send_subscription<S>(sink: &mut S, request: &TicksRequest) -> WsResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = request.to_json()?;
    sink.send(Message::Text(text))
        .await
        .map_err(WsError::SendFailed)?;
    info!(symbol = %request.ticks, "Subscription request sent");
    Ok(())
}

/// Raw payload of a data frame.
///
/// Control frames (ping/pong/close/raw frames) carry no feed data and yield
/// `None`; pings are answered by the websocket layer itself.
pub fn frame_payload(msg: Message) -> Option<Vec<u8>> {
    match msg {
        Message::Text(text) => Some(text.into_bytes()),
        Message::Binary(bytes) => Some(bytes),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

/// Top-level `"error"` object of an upstream message, if any.
///
/// The feed reports problems such as an unknown symbol in-band.
pub fn upstream_error(payload: &[u8]) -> Option<serde_json::Value> {
    // Skip the parse for the common case.
    if !payload.windows(7).any(|w| w == b"\"error\"") {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("error").filter(|e| !e.is_null()).cloned()
}
