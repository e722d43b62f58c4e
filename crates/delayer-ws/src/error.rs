//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Name resolution failed: {0}")]
    Resolve(#[source] std::io::Error),

    #[error("Connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(#[from] tokio_native_tls::native_tls::Error),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout {
        stage: &'static str,
        timeout_ms: u64,
    },

    #[error("Invalid handshake request: {0}")]
    InvalidRequest(String),

    #[error("Send failed: {0}")]
    SendFailed(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Read failed: {0}")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Name of the stage that failed, as shown in diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Connect(_) => "connect",
            Self::Tls(_) => "ssl_handshake",
            Self::Handshake(_) | Self::InvalidRequest(_) => "handshake",
            Self::Timeout { stage, .. } => *stage,
            Self::SendFailed(_) | Self::Json(_) => "write",
            Self::Read(_) | Self::ConnectionClosed { .. } => "read",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
