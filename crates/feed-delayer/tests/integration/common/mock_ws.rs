//! Mock tick server for integration tests.
//!
//! Accepts websocket connections and, once a `{"ticks": ...}` subscription
//! arrives, plays back a fixed list of messages. It records every text frame
//! it receives and the User-Agent of each upgrade request.

#![allow(dead_code)]

use delayer_ws::Endpoint;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What the server does once the playback list is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterPlayback {
    /// Send a normal Close frame.
    Close,
    /// Keep the connection open.
    StayOpen,
}

#[derive(Default)]
struct Recorded {
    messages: Vec<String>,
    connections: u32,
}

/// A mock tick server.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    recorded: Arc<Mutex<Recorded>>,
    // Written from the sync upgrade callback, before the client sees the response.
    user_agents: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockWsServer {
    /// Start a server on an available port.
    pub async fn start(playback: Vec<String>, after: AfterPlayback) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let user_agents = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recorded_clone = recorded.clone();
        let user_agents_clone = user_agents.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            recorded_clone.clone(),
                            user_agents_clone.clone(),
                            playback.clone(),
                            after,
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            recorded,
            user_agents,
        }
    }

    /// Plain websocket endpoint pointing at this server.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            path: "/websockets/v3?app_id=1089".to_string(),
            tls: false,
        }
    }

    pub async fn connection_count(&self) -> u32 {
        self.recorded.lock().await.connections
    }

    /// Text frames received from clients.
    pub async fn received_messages(&self) -> Vec<String> {
        self.recorded.lock().await.messages.clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.user_agents.lock().unwrap().clone()
    }

    /// Poll until at least `count` messages were received.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let messages = self.received_messages().await;
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("client messages not received in time")
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    recorded: Arc<Mutex<Recorded>>,
    user_agents: Arc<std::sync::Mutex<Vec<String>>>,
    playback: Vec<String>,
    after: AfterPlayback,
) {
    recorded.lock().await.connections += 1;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
            user_agents.lock().unwrap().push(ua.to_string());
        }
        Ok(resp)
    };
    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                recorded.lock().await.messages.push(text.clone());

                let subscribes = serde_json::from_str::<serde_json::Value>(&text)
                    .map(|v| v.get("ticks").is_some())
                    .unwrap_or(false);
                if !subscribes {
                    continue;
                }
                for tick in &playback {
                    if ws.send(Message::Text(tick.clone())).await.is_err() {
                        return;
                    }
                }
                if after == AfterPlayback::Close {
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "playback done".into(),
                        }))
                        .await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}
