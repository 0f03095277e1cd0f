//! # Shared Wire Schema (Agent ↔ Collector)
//!
//! Defines the vocabulary and serialized records exchanged between the
//! in-process agent and whatever consumes its uploads. Everything here is plain
//! data with `serde` derives so both sides agree on the exact JSON shape.
//!
//! ## Key Types
//!
//! - [`MetricType`], [`Category`], [`Unit`], [`Trigger`] - Enumerated labels,
//!   serialized as the lowercase / kebab-case strings the collector expects
//! - [`BreakdownRecord`] - A finalized call-graph or segment tree
//! - [`MetricRecord`] / [`MeasurementRecord`] - One metric and its latest observation
//! - [`MessageRecord`] / [`UploadRequest`] - Batched delivery envelope

use serde::{Deserialize, Serialize};

// ============================================================================
// Well-known Names
// ============================================================================

pub const NAME_CPU_TIME: &str = "CPU time";
pub const NAME_CPU_USAGE: &str = "CPU usage";
pub const NAME_MAX_RSS: &str = "Max RSS";
pub const NAME_CURRENT_RSS: &str = "Current RSS";
pub const NAME_VM_SIZE: &str = "VM Size";
pub const NAME_HEAP_ALLOCATION: &str = "Heap allocation";
pub const NAME_BLOCKING_CALL_TIMES: &str = "Blocking call times";

/// Error groups used by `record_error`
pub const ERROR_GROUP_HANDLED_EXCEPTIONS: &str = "Handled exceptions";
pub const ERROR_GROUP_RECOVERED_PANICS: &str = "Recovered panics";
pub const ERROR_GROUP_UNRECOVERED_PANICS: &str = "Unrecovered panics";

/// Message topic carrying serialized metrics
pub const TOPIC_METRIC: &str = "metric";

/// Runtime identifier sent in every upload envelope
pub const RUNTIME_TYPE: &str = "rust";

// ============================================================================
// Labels
// ============================================================================

/// Kind of metric, which determines how consecutive observations relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Point-in-time reading (RSS, CPU usage)
    State,
    /// Monotonic source; each observation reports the delta since the last one
    Counter,
    /// Sampled call graph (CPU, heap, blocking)
    Profile,
    /// Timed spans (segments)
    Trace,
}

impl MetricType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::State => "state",
            MetricType::Counter => "counter",
            MetricType::Profile => "profile",
            MetricType::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Cpu,
    Memory,
    Gc,
    Runtime,
    CpuProfile,
    MemoryProfile,
    BlockProfile,
    LockProfile,
    HttpTrace,
    SegmentTrace,
    ErrorProfile,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "cpu",
            Category::Memory => "memory",
            Category::Gc => "gc",
            Category::Runtime => "runtime",
            Category::CpuProfile => "cpu-profile",
            Category::MemoryProfile => "memory-profile",
            Category::BlockProfile => "block-profile",
            Category::LockProfile => "lock-profile",
            Category::HttpTrace => "http-trace",
            Category::SegmentTrace => "segment-trace",
            Category::ErrorProfile => "error-profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[serde(rename = "")]
    None,
    Millisecond,
    Microsecond,
    Nanosecond,
    Byte,
    Kilobyte,
    Percent,
}

impl Unit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::None => "",
            Unit::Millisecond => "millisecond",
            Unit::Microsecond => "microsecond",
            Unit::Nanosecond => "nanosecond",
            Unit::Byte => "byte",
            Unit::Kilobyte => "kilobyte",
            Unit::Percent => "percent",
        }
    }
}

/// What caused an observation to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Timer,
    Anomaly,
}

impl Trigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::Anomaly => "anomaly",
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Serialized breakdown tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRecord {
    pub name: String,
    pub measurement: f64,
    pub sample_count: i64,
    pub children: Vec<BreakdownRecord>,
}

impl BreakdownRecord {
    /// Look up a direct child by name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&BreakdownRecord> {
        self.children.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: String,
    pub trigger: Trigger,
    pub value: f64,
    /// Window length in seconds
    pub duration: u64,
    pub breakdown: Option<BreakdownRecord>,
    /// Unix seconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub category: Category,
    pub name: String,
    pub unit: Unit,
    pub measurement: Option<MeasurementRecord>,
}

/// One queued message as it appears inside an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub topic: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub messages: Vec<MessageRecord>,
    /// Flattened values for transports that need flat label sets
    pub labels: Vec<String>,
}

/// Full upload body: process envelope plus the batched payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub runtime_type: String,
    pub agent_version: String,
    pub app_name: String,
    pub app_version: String,
    pub app_environment: String,
    pub host_name: String,
    pub process_id: String,
    pub build_id: String,
    pub run_id: String,
    pub run_ts: u64,
    pub sent_at: u64,
    pub payload: UploadPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_serialize_as_collector_strings() {
        assert_eq!(serde_json::to_string(&Category::SegmentTrace).unwrap(), "\"segment-trace\"");
        assert_eq!(serde_json::to_string(&MetricType::Counter).unwrap(), "\"counter\"");
        assert_eq!(serde_json::to_string(&Unit::None).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Unit::Millisecond).unwrap(), "\"millisecond\"");
    }

    #[test]
    fn test_as_str_matches_serde() {
        for category in [Category::CpuProfile, Category::ErrorProfile, Category::Gc] {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }

    #[test]
    fn test_metric_record_type_field_renamed() {
        let record = MetricRecord {
            id: "abc".to_string(),
            metric_type: MetricType::Trace,
            category: Category::SegmentTrace,
            name: "A".to_string(),
            unit: Unit::Millisecond,
            measurement: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "trace");
        assert!(value["measurement"].is_null());
    }
}
