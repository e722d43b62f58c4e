//! WebSocket client side of feed-delayer.
//!
//! - Strictly ordered handshake: resolve, connect, TLS, websocket upgrade
//! - Observable handshake state with a terminal `Failed` state
//! - Tick subscription request and inbound frame helpers

pub mod connection;
pub mod error;
pub mod message;

pub use connection::{ConnectionConfig, ConnectionState, Endpoint, HandshakeSequencer, WsStream};
pub use error::{WsError, WsResult};
pub use message::{frame_payload, send_subscription, upstream_error, TicksRequest};
