//! Sampled call-graph profiles
//!
//! The agent does not sample the process itself. A host plugs in a
//! [`ProfileSource`] (allocation tracker, CPU sampler, lock instrumentation)
//! that hands back raw sample tables; this module turns them into breakdown
//! trees and reports them on the profiler schedule.
//!
//! ```text
//!  ProfileSource ──RawProfile──► build_call_graph ──► BreakdownNode tree
//!                                                        │
//!     ProfileReporter: drop agent frames, propagate, average windows,
//!                      scale, filter by value ──► profile metric ──► queue
//! ```

pub mod call_graph;
pub mod reporter;
pub mod source;

pub use call_graph::{build_call_graph, is_agent_frame};
pub use reporter::{ProfileMode, ProfileReporter, ProfileScale, ProfilerSettings, ValueFilter};
pub use source::{ProfileSource, RawProfile, RawSample, SampleType, StackFrame};
