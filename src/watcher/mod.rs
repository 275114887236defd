//! Execution watcher and stream relay.
//!
//! Submits a job, locates the sub-execution carrying the final answer,
//! polls it together with the shared conversation document, and relays
//! newly produced content to the caller as an ordered event stream.

pub mod delta;
pub mod locator;
pub mod relay;
pub mod submission;

/// Fixed text of the in-stream error emitted when the deadline elapses.
pub const TIMEOUT_MESSAGE: &str = "response did not finish in time";
