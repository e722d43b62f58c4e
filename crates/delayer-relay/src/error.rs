//! Relay pipeline error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Output sink closed")]
    SinkClosed,

    #[error("Output write failed: {0}")]
    Output(#[from] std::io::Error),

    #[error("Emission timer cancelled")]
    TimerCancelled,

    #[error("Emission task failed: {0}")]
    TaskFailed(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
