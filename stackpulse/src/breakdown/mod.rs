//! Concurrent breakdown trees
//!
//! A breakdown tree aggregates measurements under named, nested nodes. The
//! same structure backs every report the agent produces: call graphs built
//! from profiler samples, per-segment duration trees and error groupings.
//!
//! - [`node`]: the tree node itself, with lock-free increments and per-node
//!   locks for structural edits and the percentile reservoir
//! - [`atomic_f64`]: the compare-and-swap float accumulator used on the hot path

pub mod atomic_f64;
pub mod node;

pub use atomic_f64::AtomicF64;
pub use node::{BreakdownNode, PERCENTILE, RESERVOIR_SIZE, ROOT_NAME};
