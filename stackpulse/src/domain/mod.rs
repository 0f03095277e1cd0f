//! Domain model for stackpulse
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{HashId, UnixTime};

pub use errors::{AgentError, ConfigError, ProfileError, TransportError};
