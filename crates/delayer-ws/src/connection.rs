//! Handshake sequencing for the upstream feed connection.
//!
//! The transport is brought up as a linear sequence of awaited stages:
//! resolve, TCP connect, TLS handshake, websocket upgrade. Each stage starts
//! only after the previous one succeeded; any failure moves the sequencer to
//! the terminal `Failed` state. There is no reconnection.

use crate::error::{WsError, WsResult};
use delayer_telemetry::Metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_native_tls::{native_tls, TlsConnector, TlsStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

/// Established websocket transport.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upstream endpoint identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Request target, including the application id query.
    pub path: String,
    /// `false` selects plain `ws://` and skips the TLS stage.
    pub tls: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "ws.binaryws.com".to_string(),
            port: 443,
            path: "/websockets/v3?app_id=1089".to_string(),
            tls: true,
        }
    }
}

impl Endpoint {
    /// Full websocket URL with explicit port.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    /// Sent as `User-Agent` on the websocket upgrade request.
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    pub tls_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            user_agent: format!("feed-delayer/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 30_000,
            tls_timeout_ms: 30_000,
            handshake_timeout_ms: 30_000,
        }
    }
}

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started.
    Idle,
    Resolving,
    Connecting,
    TlsHandshaking,
    ProtocolHandshaking,
    /// Transport is up; subscription and reads may proceed.
    Ready,
    /// Terminal.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::TlsHandshaking => "tls_handshaking",
            Self::ProtocolHandshaking => "protocol_handshaking",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the transport through its handshake stages exactly once.
pub struct HandshakeSequencer {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    /// Every state entered, starting with `Idle`.
    history: RwLock<Vec<ConnectionState>>,
}

impl HandshakeSequencer {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ConnectionState::Idle),
            history: RwLock::new(vec![ConnectionState::Idle]),
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// States entered so far, in order.
    pub fn history(&self) -> Vec<ConnectionState> {
        self.history.read().clone()
    }

    /// Run every stage in order and return the ready transport.
    ///
    /// Callable once; a sequencer that already left `Idle` refuses to run.
    pub async fn establish(&self) -> WsResult<WsStream> {
        if self.state() != ConnectionState::Idle {
            return Err(WsError::InvalidRequest(format!(
                "handshake already attempted (state={})",
                self.state()
            )));
        }

        match self.run_stages().await {
            Ok(ws) => {
                self.transition(ConnectionState::Ready);
                info!(url = %self.config.endpoint.url(), "WebSocket handshake complete");
                Ok(ws)
            }
            Err(e) => {
                self.transition(ConnectionState::Failed);
                error!(
                    stage = e.stage(),
                    path = ?self.history(),
                    error = %e,
                    "Handshake failed"
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&self) -> WsResult<WsStream> {
        self.transition(ConnectionState::Resolving);
        let addrs = self.resolve().await?;

        self.transition(ConnectionState::Connecting);
        let tcp = self.connect(&addrs).await?;

        let stream = if self.config.endpoint.tls {
            self.transition(ConnectionState::TlsHandshaking);
            MaybeTlsStream::NativeTls(self.tls_handshake(tcp).await?)
        } else {
            debug!("Plain endpoint, skipping TLS stage");
            MaybeTlsStream::Plain(tcp)
        };

        self.transition(ConnectionState::ProtocolHandshaking);
        self.protocol_handshake(stream).await
    }

    fn transition(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        self.history.write().push(next);
        Metrics::ws_state_set(next.as_str());
        debug!(from = %prev, to = %next, "Handshake state transition");
    }

    async fn resolve(&self) -> WsResult<Vec<SocketAddr>> {
        let Endpoint { host, port, .. } = &self.config.endpoint;
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), *port))
            .await
            .map_err(WsError::Resolve)?
            .collect();

        if addrs.is_empty() {
            return Err(WsError::Resolve(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {host}:{port}"),
            )));
        }

        debug!(host = %host, count = addrs.len(), "Resolved endpoint");
        Ok(addrs)
    }

    async fn connect(&self, addrs: &[SocketAddr]) -> WsResult<TcpStream> {
        let tcp = with_timeout(
            "connect",
            self.config.connect_timeout_ms,
            TcpStream::connect(addrs),
        )
        .await?
        .map_err(WsError::Connect)?;

        // TCP_NODELAY: ticks are small and latency matters more than batching.
        tcp.set_nodelay(true).map_err(WsError::Connect)?;

        if let Ok(peer) = tcp.peer_addr() {
            debug!(%peer, "TCP connected");
        }
        Ok(tcp)
    }

    async fn tls_handshake(&self, tcp: TcpStream) -> WsResult<TlsStream<TcpStream>> {
        let connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?;
        let connector = TlsConnector::from(connector);

        // SNI is taken from the domain argument.
        let tls = with_timeout(
            "ssl_handshake",
            self.config.tls_timeout_ms,
            connector.connect(&self.config.endpoint.host, tcp),
        )
        .await??;

        debug!("TLS handshake complete");
        Ok(tls)
    }

    async fn protocol_handshake(&self, stream: MaybeTlsStream<TcpStream>) -> WsResult<WsStream> {
        let mut request = self
            .config
            .endpoint
            .url()
            .into_client_request()
            .map_err(|e| WsError::InvalidRequest(e.to_string()))?;

        let user_agent = HeaderValue::from_str(&self.config.user_agent)
            .map_err(|e| WsError::InvalidRequest(format!("user agent: {e}")))?;
        request.headers_mut().insert(USER_AGENT, user_agent);

        let (ws, response) = with_timeout(
            "handshake",
            self.config.handshake_timeout_ms,
            tokio_tungstenite::client_async(request, stream),
        )
        .await?
        .map_err(WsError::Handshake)?;

        debug!(status = %response.status(), "WebSocket upgrade accepted");
        Ok(ws)
    }
}

async fn with_timeout<F: Future>(
    stage: &'static str,
    timeout_ms: u64,
    fut: F,
) -> WsResult<F::Output> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .map_err(|_| WsError::Timeout { stage, timeout_ms })
}
