//! Structured error types for stackpulse
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Agent must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("Profiler {0} registered after the agent was started")]
    RegisteredAfterStart(String),

    #[error("Profiler {name} has invalid settings: {reason}")]
    InvalidProfiler { name: String, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required option: {0}")]
    MissingField(&'static str),

    #[error("Interval {name} must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile is missing sample type {0:?}")]
    MissingSampleType(String),

    #[error("Sample {index} has {found} values, expected at least {expected}")]
    MalformedSample { index: usize, found: usize, expected: usize },

    #[error("Profile source failed: {0}")]
    SourceFailed(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Collector rejected upload: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
