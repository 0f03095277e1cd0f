//! # stackpulse - in-process performance agent
//!
//! stackpulse runs inside a host application, aggregates what the host
//! measures (named segment durations, errors) and what it can sample
//! (process CPU and memory, plugged-in call-graph profiles), and ships the
//! results to a collector in periodic batches.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Host Application                         │
//! │   record_segment / measure_segment / record_error               │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ingress (no-op until started)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Agent (this crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Segment    │  │    Error     │  │   Process    │          │
//! │  │  Reporter    │  │  Reporter    │  │  Reporter    │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │   ┌─────────────┴──┐              │                  │
//! │         │   │ ProfileReporter│◄── ProfileSource (host plug-in) │
//! │         │   └───────┬────────┘              │                  │
//! │         ▼           ▼                       ▼                  │
//! │   BreakdownNode trees ──► Metric observations                   │
//! │                               │                                 │
//! │            ProfilerScheduler  │ (timers + jitter, one global    │
//! │            drives every step  │  profiler lock)                 │
//! │                               ▼                                 │
//! │                       DeliveryQueue ──► Transport               │
//! │                (expiry, retry, exponential backoff)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`breakdown`]: concurrent hierarchical aggregation tree with p95 reservoir
//! - [`metric`]: metric identity and observations (counter deltas)
//! - [`scheduler`]: periodic record/report timers with panic isolation
//! - [`reporting`]: segment, error and process reporters
//! - [`profiling`]: call-graph profiles from pluggable sources
//! - [`delivery`]: outbound queue and transports
//! - [`agent`]: lifecycle, start latch and the host-facing API
//! - [`config`], [`domain`], [`diagnostics`], [`identity`], [`system`]: ambient support
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use stackpulse::{Agent, AgentConfig, LogTransport};
//!
//! # async fn demo() -> Result<(), stackpulse::domain::AgentError> {
//! let agent = Agent::new(Arc::new(LogTransport));
//! agent.start(AgentConfig::for_app("shop"))?;
//!
//! {
//!     let _segment = agent.measure_segment("checkout");
//!     // ... work ...
//! }
//!
//! agent.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod breakdown;
pub mod cli;
pub mod config;
pub mod context;
pub mod delivery;
pub mod diagnostics;
pub mod domain;
pub mod identity;
pub mod metric;
pub mod profiling;
pub mod reporting;
pub mod scheduler;
pub mod system;

pub use agent::{Agent, Segment, AGENT_VERSION};
pub use config::AgentConfig;
pub use delivery::{DeliveryQueue, JsonLinesTransport, LogTransport, Transport};
pub use profiling::{ProfileSource, ProfilerSettings, RawProfile};
