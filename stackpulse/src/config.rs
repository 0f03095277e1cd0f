//! Agent configuration
//!
//! [`AgentConfig`] is handed to [`Agent::start`](crate::Agent::start). It can be
//! built in code (struct update syntax over `Default`) or loaded from a JSON
//! file; missing keys fall back to their defaults.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::domain::ConfigError;

/// Default collector endpoint, only informational for custom transports
pub const DEFAULT_DASHBOARD_ADDRESS: &str = "http://localhost:8080/metrics";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_key: String,
    /// Required
    pub app_name: String,
    pub app_version: String,
    pub app_environment: String,
    /// Resolved from the kernel hostname when empty
    pub host_name: String,
    pub dashboard_address: String,
    /// Emit internal diagnostics through the `log` facade
    pub debug: bool,
    /// Keep the agent's own frames in reported call graphs
    pub profile_agent: bool,
    pub timings: Timings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_key: String::new(),
            app_name: String::new(),
            app_version: String::new(),
            app_environment: String::new(),
            host_name: String::new(),
            dashboard_address: DEFAULT_DASHBOARD_ADDRESS.to_string(),
            debug: false,
            profile_agent: false,
            timings: Timings::default(),
        }
    }
}

/// Intervals of the agent's own timers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub segment_report_interval_ms: u64,
    pub error_report_interval_ms: u64,
    pub process_report_interval_ms: u64,
    pub flush_interval_ms: u64,
    /// Queued messages older than this are dropped before a flush
    pub message_expiry_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            segment_report_interval_ms: 60_000,
            error_report_interval_ms: 60_000,
            process_report_interval_ms: 60_000,
            flush_interval_ms: 1_000,
            message_expiry_secs: 10 * 60,
        }
    }
}

impl Timings {
    #[must_use]
    pub fn segment_report_interval(&self) -> Duration {
        Duration::from_millis(self.segment_report_interval_ms)
    }

    #[must_use]
    pub fn error_report_interval(&self) -> Duration {
        Duration::from_millis(self.error_report_interval_ms)
    }

    #[must_use]
    pub fn process_report_interval(&self) -> Duration {
        Duration::from_millis(self.process_report_interval_ms)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("segment_report_interval_ms", self.segment_report_interval_ms),
            ("error_report_interval_ms", self.error_report_interval_ms),
            ("process_report_interval_ms", self.process_report_interval_ms),
            ("flush_interval_ms", self.flush_interval_ms),
        ];
        match intervals.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(ConfigError::ZeroInterval { name: *name }),
            None => Ok(()),
        }
    }
}

impl AgentConfig {
    /// Minimal configuration for an application name
    #[must_use]
    pub fn for_app(app_name: impl Into<String>) -> Self {
        Self { app_name: app_name.into(), ..Self::default() }
    }

    /// Load a JSON config file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check required options and interval sanity
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::MissingField("app_name"));
        }
        self.timings.validate()
    }

    /// Fill in the host name from the system if it was left empty
    pub fn resolve_host_name(&mut self) {
        if self.host_name.is_empty() {
            self.host_name = system_host_name();
        }
    }
}

fn system_host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_app_name_required() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("app_name")));
        assert!(AgentConfig::for_app("shop").validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = AgentConfig::for_app("shop");
        config.timings.flush_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flush_interval_ms"));
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"app_name": "shop", "debug": true, "timings": {{"flush_interval_ms": 250}}}}"#)
            .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.app_name, "shop");
        assert!(config.debug);
        assert_eq!(config.timings.flush_interval(), Duration::from_millis(250));
        assert_eq!(config.timings.message_expiry_secs, 600);
        assert_eq!(config.dashboard_address, DEFAULT_DASHBOARD_ADDRESS);
    }

    #[test]
    fn test_resolve_host_name_keeps_explicit() {
        let mut config = AgentConfig { host_name: "box-1".to_string(), ..AgentConfig::for_app("a") };
        config.resolve_host_name();
        assert_eq!(config.host_name, "box-1");

        let mut config = AgentConfig::for_app("a");
        config.resolve_host_name();
        assert!(!config.host_name.is_empty());
    }
}
