//! Delayed tick feed relay.
//!
//! Connects to the upstream feed, subscribes to one symbol and writes every
//! inbound message to stdout after a fixed delay, with its epoch fields
//! advanced by that delay.

pub mod app;
pub mod config;
pub mod error;

pub use app::Session;
pub use config::{parse_delay, AppConfig, Args, FailurePolicy};
pub use error::{AppError, AppResult};
