//! Integration tests for feed-delayer.
//!
//! These tests run a full session against a local WebSocket server:
//! - Handshake and subscription
//! - Delayed relay with epoch rewriting
//! - Transport loss and shutdown handling

pub mod common;
