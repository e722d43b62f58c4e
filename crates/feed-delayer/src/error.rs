//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wrong delay time: {0}")]
    InvalidDelay(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<delayer_ws::WsError>),

    #[error("Relay error: {0}")]
    Relay(#[from] delayer_relay::RelayError),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<delayer_ws::WsError> for AppError {
    fn from(e: delayer_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
