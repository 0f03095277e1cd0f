//! State shared by every reporter of one running agent

use parking_lot::Mutex;
use stackpulse_common::{Category, MetricType, Unit, TOPIC_METRIC};
use std::sync::Arc;

use crate::agent_error;
use crate::config::AgentConfig;
use crate::delivery::DeliveryQueue;
use crate::diagnostics::Diagnostics;
use crate::identity::IdGenerator;
use crate::metric::Metric;

pub struct AgentContext {
    pub config: AgentConfig,
    pub diagnostics: Diagnostics,
    pub ids: IdGenerator,
    /// Held by every scheduled profiler action, so none of them overlap
    pub profiler_lock: Arc<Mutex<()>>,
    pub queue: Arc<DeliveryQueue>,
}

impl AgentContext {
    #[must_use]
    pub fn new(config: AgentConfig, queue: Arc<DeliveryQueue>) -> Self {
        let diagnostics = Diagnostics::new(config.debug);
        Self {
            config,
            diagnostics,
            ids: IdGenerator::new(),
            profiler_lock: Arc::new(Mutex::new(())),
            queue,
        }
    }

    #[must_use]
    pub fn metric(&self, metric_type: MetricType, category: Category, name: &str, unit: Unit) -> Metric {
        Metric::new(&self.config, metric_type, category, name, unit)
    }

    /// Queue `metric` for delivery if it carries a measurement
    pub fn emit(&self, metric: &Metric) -> bool {
        if !metric.has_measurement() {
            return false;
        }
        match self.queue.enqueue_record(TOPIC_METRIC, &metric.to_record()) {
            Ok(()) => true,
            Err(err) => {
                agent_error!(self.diagnostics, "Failed to encode metric {}: {}", metric.name(), err);
                false
            }
        }
    }
}
