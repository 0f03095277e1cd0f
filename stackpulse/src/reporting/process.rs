//! Process CPU and memory metrics
//!
//! Every report reads the process counters and emits:
//!
//! | name          | type    | category | unit       |
//! |---------------|---------|----------|------------|
//! | CPU time      | counter | cpu      | nanosecond |
//! | CPU usage     | state   | cpu      | percent    |
//! | Max RSS       | state   | memory   | kilobyte   |
//! | Current RSS   | state   | memory   | kilobyte   |
//! | VM Size       | state   | memory   | kilobyte   |
//!
//! CPU time and usage need a previous reading, so they first appear in the
//! second report. A reading that fails is logged and skipped.

#![allow(clippy::cast_precision_loss)]

use parking_lot::Mutex;
use stackpulse_common::{
    Category, MetricType, Trigger, Unit, NAME_CPU_TIME, NAME_CPU_USAGE, NAME_CURRENT_RSS, NAME_MAX_RSS, NAME_VM_SIZE,
};
use std::sync::Arc;
use std::time::Instant;

use crate::agent_error;
use crate::context::AgentContext;
use crate::metric::Metric;
use crate::scheduler::ProfilerScheduler;
use crate::system;

struct ProcessMetrics {
    cpu_time: Metric,
    cpu_usage: Metric,
    max_rss: Metric,
    current_rss: Metric,
    vm_size: Metric,
    last_report: Option<Instant>,
}

pub struct ProcessReporter {
    ctx: Arc<AgentContext>,
    metrics: Mutex<ProcessMetrics>,
}

impl ProcessReporter {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        let metrics = ProcessMetrics {
            cpu_time: ctx.metric(MetricType::Counter, Category::Cpu, NAME_CPU_TIME, Unit::Nanosecond),
            cpu_usage: ctx.metric(MetricType::State, Category::Cpu, NAME_CPU_USAGE, Unit::Percent),
            max_rss: ctx.metric(MetricType::State, Category::Memory, NAME_MAX_RSS, Unit::Kilobyte),
            current_rss: ctx.metric(MetricType::State, Category::Memory, NAME_CURRENT_RSS, Unit::Kilobyte),
            vm_size: ctx.metric(MetricType::State, Category::Memory, NAME_VM_SIZE, Unit::Kilobyte),
            last_report: None,
        };
        Self { ctx, metrics: Mutex::new(metrics) }
    }

    /// Returns the number of metrics queued
    pub fn report(&self) -> usize {
        let ctx = &self.ctx;
        let duration = ctx.config.timings.process_report_interval().as_secs();
        let mut guard = self.metrics.lock();
        let metrics = &mut *guard;
        let now = Instant::now();
        let elapsed = metrics.last_report.replace(now).map(|at| now.duration_since(at));
        let mut emitted = 0;

        match system::cpu_time() {
            Ok(cpu) => {
                let delta = metrics
                    .cpu_time
                    .create_observation(&ctx.ids, Trigger::Timer, cpu.as_nanos() as f64, duration, None)
                    .map(|m| m.value);
                emitted += usize::from(ctx.emit(&metrics.cpu_time));

                if let (Some(delta), Some(elapsed)) = (delta, elapsed) {
                    let capacity = elapsed.as_nanos() as f64 * system::cpu_count() as f64;
                    if capacity > 0.0 {
                        let usage = delta / capacity * 100.0;
                        metrics.cpu_usage.create_observation(&ctx.ids, Trigger::Timer, usage, duration, None);
                        emitted += usize::from(ctx.emit(&metrics.cpu_usage));
                    }
                }
            }
            Err(err) => agent_error!(ctx.diagnostics, "Failed to read CPU time: {:#}", err),
        }

        let readings = [
            (system::max_rss_kb(), &mut metrics.max_rss),
            (system::current_rss_kb(), &mut metrics.current_rss),
            (system::vm_size_kb(), &mut metrics.vm_size),
        ];
        for (reading, metric) in readings {
            match reading {
                Ok(kb) => {
                    metric.create_observation(&ctx.ids, Trigger::Timer, kb as f64, duration, None);
                    emitted += usize::from(ctx.emit(metric));
                }
                Err(err) => agent_error!(ctx.diagnostics, "Failed to read {}: {:#}", metric.name(), err),
            }
        }

        emitted
    }

    #[must_use]
    pub fn scheduler(self: &Arc<Self>) -> ProfilerScheduler {
        let reporter = Arc::clone(self);
        ProfilerScheduler::new(
            "process",
            self.ctx.config.timings.process_report_interval(),
            move || {
                reporter.report();
            },
            Arc::clone(&self.ctx.profiler_lock),
            self.ctx.diagnostics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::delivery::{DeliveryQueue, Envelope, LogTransport, MessageBody};
    use crate::diagnostics::Diagnostics;
    use stackpulse_common::MetricRecord;

    fn reporter() -> ProcessReporter {
        let queue = Arc::new(DeliveryQueue::new(Arc::new(LogTransport), Envelope::default(), 600, Diagnostics::default()));
        ProcessReporter::new(Arc::new(AgentContext::new(AgentConfig::for_app("shop"), queue)))
    }

    fn names(reporter: &ProcessReporter) -> Vec<String> {
        reporter
            .ctx
            .queue
            .pending()
            .into_iter()
            .filter_map(|m| match m.body {
                MessageBody::Structured(v) => serde_json::from_value::<MetricRecord>(v).ok(),
                MessageBody::Flattened(_) => None,
            })
            .map(|m| m.name)
            .collect()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cpu_metrics_appear_from_second_report() {
        let reporter = reporter();

        reporter.report();
        let first = names(&reporter);
        assert!(!first.iter().any(|n| n == NAME_CPU_TIME));
        assert!(first.iter().any(|n| n == NAME_MAX_RSS));
        assert!(first.iter().any(|n| n == NAME_CURRENT_RSS));
        assert!(first.iter().any(|n| n == NAME_VM_SIZE));

        std::thread::sleep(std::time::Duration::from_millis(10));
        reporter.report();
        let all = names(&reporter);
        assert!(all.iter().any(|n| n == NAME_CPU_TIME));
        assert!(all.iter().any(|n| n == NAME_CPU_USAGE));
    }
}
