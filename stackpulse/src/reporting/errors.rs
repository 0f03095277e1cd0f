//! Grouped error occurrences
//!
//! Errors are counted in a live tree `root → group → message`. Each report
//! swaps in an empty tree and emits one state metric per group whose value is
//! the number of errors seen in the window.

use parking_lot::RwLock;
use stackpulse_common::{Category, MetricType, Trigger, Unit};
use std::sync::Arc;

use crate::agent_log;
use crate::breakdown::BreakdownNode;
use crate::context::AgentContext;
use crate::scheduler::ProfilerScheduler;

pub struct ErrorReporter {
    ctx: Arc<AgentContext>,
    live: RwLock<Arc<BreakdownNode>>,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx, live: RwLock::new(Arc::new(BreakdownNode::root())) }
    }

    pub fn record(&self, group: &str, message: &str) {
        // The read guard keeps the window from being swapped mid-increment
        let root = self.live.read();
        root.get_or_create_child(group).get_or_create_child(message).increment(1.0, 1);
    }

    /// Returns the number of metrics queued
    pub fn report(&self) -> usize {
        let window = std::mem::replace(&mut *self.live.write(), Arc::new(BreakdownNode::root()));
        let duration = self.ctx.config.timings.error_report_interval().as_secs();

        let mut emitted = 0;
        for group in window.children() {
            let root = BreakdownNode::root();
            root.add_child(Arc::clone(&group));
            root.propagate();

            let mut metric = self.ctx.metric(MetricType::State, Category::ErrorProfile, group.name(), Unit::None);
            let value = root.measurement();
            metric.create_observation(&self.ctx.ids, Trigger::Timer, value, duration, Some(Arc::new(root)));
            if self.ctx.emit(&metric) {
                emitted += 1;
            }
        }
        if emitted > 0 {
            agent_log!(self.ctx.diagnostics, "Reported {} error groups", emitted);
        }
        emitted
    }

    #[must_use]
    pub fn scheduler(self: &Arc<Self>) -> ProfilerScheduler {
        let reporter = Arc::clone(self);
        ProfilerScheduler::new(
            "errors",
            self.ctx.config.timings.error_report_interval(),
            move || {
                reporter.report();
            },
            Arc::clone(&self.ctx.profiler_lock),
            self.ctx.diagnostics,
        )
    }
}
