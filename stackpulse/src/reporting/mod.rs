//! Reporters owning one measurement stream each
//!
//! - [`segments`]: named durations recorded by the host, reported as p95 traces
//! - [`errors`]: grouped error messages, reported as occurrence counts
//! - [`process`]: CPU and memory readings of the host process

pub mod errors;
pub mod process;
pub mod segments;

pub use errors::ErrorReporter;
pub use process::ProcessReporter;
pub use segments::SegmentReporter;
