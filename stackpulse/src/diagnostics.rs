//! Debug-gated internal logging
//!
//! The agent runs inside someone else's process, so its chatter stays silent
//! unless `debug` was enabled in the config. All internal diagnostics go
//! through [`agent_log!`](crate::agent_log) / [`agent_error!`](crate::agent_error),
//! which check the gate before formatting anything.

/// Logging gate shared by every component of one agent
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[must_use]
    pub fn enabled(self) -> bool {
        self.enabled
    }
}

/// Log an informational agent message when debug is enabled
#[macro_export]
macro_rules! agent_log {
    ($diag:expr, $($arg:tt)+) => {
        if $diag.enabled() {
            ::log::info!(target: "stackpulse", $($arg)+);
        }
    };
}

/// Log an agent error when debug is enabled
#[macro_export]
macro_rules! agent_error {
    ($diag:expr, $($arg:tt)+) => {
        if $diag.enabled() {
            ::log::error!(target: "stackpulse", $($arg)+);
        }
    };
}
