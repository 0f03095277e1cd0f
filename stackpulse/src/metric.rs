//! Metrics and their observations
//!
//! A [`Metric`] is identified by a stable hash of its labels and lives across
//! reporting windows, so a counter can remember the previous raw reading and
//! report the delta.

use stackpulse_common::{Category, MeasurementRecord, MetricRecord, MetricType, Trigger, Unit};
use std::sync::Arc;

use crate::breakdown::BreakdownNode;
use crate::config::AgentConfig;
use crate::domain::{HashId, UnixTime};
use crate::identity::IdGenerator;

/// One observation of a metric
#[derive(Debug, Clone)]
pub struct Measurement {
    pub id: HashId,
    pub trigger: Trigger,
    pub value: f64,
    /// Window length in seconds
    pub duration: u64,
    pub breakdown: Option<Arc<BreakdownNode>>,
    pub timestamp: UnixTime,
}

#[derive(Debug)]
pub struct Metric {
    id: HashId,
    metric_type: MetricType,
    category: Category,
    name: String,
    unit: Unit,
    measurement: Option<Measurement>,
    /// Counter only: a baseline reading has been taken
    has_baseline: bool,
    last_value: f64,
}

impl Metric {
    /// Build a metric whose id hashes the app identity and the metric labels
    #[must_use]
    pub fn new(
        config: &AgentConfig,
        metric_type: MetricType,
        category: Category,
        name: impl Into<String>,
        unit: Unit,
    ) -> Self {
        let name = name.into();
        let id = HashId::digest([
            config.app_name.as_str(),
            config.app_environment.as_str(),
            config.host_name.as_str(),
            metric_type.as_str(),
            category.as_str(),
            name.as_str(),
            unit.as_str(),
        ]);
        Self {
            id,
            metric_type,
            category,
            name,
            unit,
            measurement: None,
            has_baseline: false,
            last_value: 0.0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &HashId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    #[must_use]
    pub fn measurement(&self) -> Option<&Measurement> {
        self.measurement.as_ref()
    }

    #[must_use]
    pub fn has_measurement(&self) -> bool {
        self.measurement.is_some()
    }

    /// Attach a new observation of `value`.
    ///
    /// Counters store the delta against the previous raw value. Their first
    /// call only records the baseline and returns `None`.
    pub fn create_observation(
        &mut self,
        ids: &IdGenerator,
        trigger: Trigger,
        value: f64,
        duration: u64,
        breakdown: Option<Arc<BreakdownNode>>,
    ) -> Option<&Measurement> {
        let value = if self.metric_type == MetricType::Counter {
            let previous = self.last_value;
            self.last_value = value;
            if !self.has_baseline {
                self.has_baseline = true;
                return None;
            }
            value - previous
        } else {
            value
        };

        self.measurement = Some(Measurement {
            id: ids.next_id(),
            trigger,
            value,
            duration,
            breakdown,
            timestamp: UnixTime::now(),
        });
        self.measurement.as_ref()
    }

    #[must_use]
    pub fn to_record(&self) -> MetricRecord {
        MetricRecord {
            id: self.id.to_string(),
            metric_type: self.metric_type,
            category: self.category,
            name: self.name.clone(),
            unit: self.unit,
            measurement: self.measurement.as_ref().map(|m| MeasurementRecord {
                id: m.id.to_string(),
                trigger: m.trigger,
                value: m.value,
                duration: m.duration,
                breakdown: m.breakdown.as_ref().map(|b| b.to_record()),
                timestamp: m.timestamp.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig { host_name: "box".to_string(), ..AgentConfig::for_app("shop") }
    }

    #[test]
    fn test_counter_reports_deltas_after_baseline() {
        let ids = IdGenerator::new();
        let mut metric = Metric::new(&config(), MetricType::Counter, Category::Cpu, "CPU time", Unit::Nanosecond);

        assert!(metric.create_observation(&ids, Trigger::Timer, 100.0, 60, None).is_none());
        assert!(!metric.has_measurement());

        let m = metric.create_observation(&ids, Trigger::Timer, 130.0, 60, None).unwrap();
        assert!((m.value - 30.0).abs() < f64::EPSILON);

        let m = metric.create_observation(&ids, Trigger::Timer, 175.0, 60, None).unwrap();
        assert!((m.value - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_state_stores_raw_value() {
        let ids = IdGenerator::new();
        let mut metric = Metric::new(&config(), MetricType::State, Category::Memory, "Max RSS", Unit::Kilobyte);
        let m = metric.create_observation(&ids, Trigger::Timer, 2048.0, 60, None).unwrap();
        assert!((m.value - 2048.0).abs() < f64::EPSILON);
        assert_eq!(m.duration, 60);
    }

    #[test]
    fn test_id_is_stable_and_label_sensitive() {
        let a = Metric::new(&config(), MetricType::Trace, Category::SegmentTrace, "A", Unit::Millisecond);
        let b = Metric::new(&config(), MetricType::Trace, Category::SegmentTrace, "A", Unit::Millisecond);
        let c = Metric::new(&config(), MetricType::Trace, Category::SegmentTrace, "B", Unit::Millisecond);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_record_carries_breakdown() {
        let ids = IdGenerator::new();
        let root = BreakdownNode::root();
        root.get_or_create_child("A").increment(5.0, 1);
        root.propagate();

        let mut metric = Metric::new(&config(), MetricType::Trace, Category::SegmentTrace, "A", Unit::Millisecond);
        metric.create_observation(&ids, Trigger::Timer, 5.0, 60, Some(Arc::new(root)));

        let record = metric.to_record();
        assert_eq!(record.category, Category::SegmentTrace);
        let breakdown = record.measurement.unwrap().breakdown.unwrap();
        assert_eq!(breakdown.name, "root");
        assert_eq!(breakdown.child("A").unwrap().sample_count, 1);
    }
}
