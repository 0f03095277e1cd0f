//! Raw profile data handed over by a profile source

use std::fmt;
use std::time::Duration;

use crate::domain::ProfileError;

/// One resolved frame of a sampled stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self { function: function.into(), file: Some(file.into()), line: Some(line) }
    }
}

/// `function (file:line)`, with `?` for unknown locations
impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("?");
        match self.line {
            Some(line) => write!(f, "{} ({}:{})", self.function, file, line),
            None => write!(f, "{} ({})", self.function, file),
        }
    }
}

/// Name and unit of one value column, e.g. `inuse_space`/`bytes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleType {
    pub kind: String,
    pub unit: String,
}

impl SampleType {
    pub fn new(kind: impl Into<String>, unit: impl Into<String>) -> Self {
        Self { kind: kind.into(), unit: unit.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Innermost frame first
    pub frames: Vec<StackFrame>,
    /// One value per [`RawProfile::sample_types`] column
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProfile {
    pub sample_types: Vec<SampleType>,
    pub samples: Vec<RawSample>,
}

impl RawProfile {
    /// Column index of the sample type called `kind`
    #[must_use]
    pub fn column(&self, kind: &str) -> Option<usize> {
        self.sample_types.iter().position(|t| t.kind == kind)
    }
}

/// Produces raw profiles on demand
///
/// Called from the blocking pool while the process-wide profiler lock is held,
/// so implementations may block for the whole recording window.
pub trait ProfileSource: Send + Sync {
    /// Windowed sources record for `window` and return what they saw;
    /// snapshot sources get `None` and return their current state.
    ///
    /// # Errors
    /// Returns [`ProfileError::SourceFailed`] if no profile could be produced
    fn read_profile(&self, window: Option<Duration>) -> Result<RawProfile, ProfileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label() {
        assert_eq!(StackFrame::new("app::handler", "src/app.rs", 42).to_string(), "app::handler (src/app.rs:42)");
        let unknown = StackFrame { function: "memcpy".to_string(), file: None, line: None };
        assert_eq!(unknown.to_string(), "memcpy (?)");
    }

    #[test]
    fn test_column_lookup() {
        let profile = RawProfile {
            sample_types: vec![SampleType::new("inuse_objects", "count"), SampleType::new("inuse_space", "bytes")],
            samples: vec![],
        };
        assert_eq!(profile.column("inuse_space"), Some(1));
        assert_eq!(profile.column("alloc_space"), None);
    }
}
