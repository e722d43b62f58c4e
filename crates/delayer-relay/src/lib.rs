//! Delayed relay pipeline.
//!
//! Inbound feed messages are held for a fixed delay, have their epoch fields
//! advanced by that delay, and are written as lines to a single output stream.
//!
//! - `read_loop`: receives frames and schedules one emission per message
//! - `emission`: per-message timer tasks, tracked in a drainable registry
//! - `rewrite`: epoch field rewrite
//! - `sink`: single writer task serializing all output

pub mod emission;
pub mod error;
pub mod read_loop;
pub mod rewrite;
pub mod sink;

pub use emission::{DelayedEmission, DrainSummary, EmissionOutcome, EmissionScheduler};
pub use error::{RelayError, RelayResult};
pub use read_loop::{run_read_loop, ReadLoopExit};
pub use rewrite::{rewrite_epochs, Rewritten};
pub use sink::{OutputSink, SinkHandle, SinkSlot};
