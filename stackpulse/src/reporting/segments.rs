//! Segment durations
//!
//! ```text
//!  record("checkout", 42.0)                 report() every window
//!  ────────────────────────                 ─────────────────────
//!  read lock ─► node found? ─► reservoir    write lock ─► take whole map
//!      │ no                                 per segment:
//!      ▼                                      root ─ segment node
//!  write lock ─► insert node ─► reservoir     evaluate p95, propagate
//!                                             emit trace metric
//! ```
//!
//! A recorder holds the tables lock (read or write) for as long as it feeds a
//! node, so once `report` has swapped the map out under the write lock no
//! recorder can still be touching the detached nodes.

use parking_lot::RwLock;
use stackpulse_common::{Category, MetricType, Trigger, Unit};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent_log;
use crate::breakdown::{AtomicF64, BreakdownNode};
use crate::context::AgentContext;
use crate::scheduler::ProfilerScheduler;

#[derive(Default)]
struct SegmentTables {
    /// Live window, one node per segment name
    nodes: HashMap<String, Arc<BreakdownNode>>,
    /// Most recent duration per name, NaN once consumed
    last_durations: HashMap<String, Arc<AtomicF64>>,
}

pub struct SegmentReporter {
    ctx: Arc<AgentContext>,
    tables: RwLock<SegmentTables>,
}

impl SegmentReporter {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx, tables: RwLock::new(SegmentTables::default()) }
    }

    /// Add one duration (milliseconds) to the current window
    pub fn record(&self, name: &str, duration_ms: f64) {
        if name.is_empty() {
            agent_log!(self.ctx.diagnostics, "Ignoring segment with empty name");
            return;
        }

        let recorded = {
            let tables = self.tables.read();
            match tables.nodes.get(name) {
                Some(node) => {
                    node.record_for_percentile(duration_ms);
                    if let Some(slot) = tables.last_durations.get(name) {
                        slot.store(duration_ms);
                        return;
                    }
                    true
                }
                None => false,
            }
        };

        let mut tables = self.tables.write();
        if !recorded {
            tables
                .nodes
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(BreakdownNode::new(name)))
                .record_for_percentile(duration_ms);
        }
        tables
            .last_durations
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(AtomicF64::new(f64::NAN)))
            .store(duration_ms);
    }

    /// Emit one trace metric per segment seen this window and start a new one
    ///
    /// Returns the number of metrics queued.
    pub fn report(&self) -> usize {
        let window = std::mem::take(&mut self.tables.write().nodes);
        let duration = self.ctx.config.timings.segment_report_interval().as_secs();

        let mut emitted = 0;
        for (name, node) in window {
            let root = BreakdownNode::root();
            root.add_child(node);
            root.evaluate_percentile();
            root.propagate();

            let mut metric = self.ctx.metric(MetricType::Trace, Category::SegmentTrace, &name, Unit::Millisecond);
            let value = root.measurement();
            metric.create_observation(&self.ctx.ids, Trigger::Timer, value, duration, Some(Arc::new(root)));
            if self.ctx.emit(&metric) {
                emitted += 1;
            }
        }
        agent_log!(self.ctx.diagnostics, "Reported {} segment metrics", emitted);
        emitted
    }

    /// Latest duration of every segment recorded since the previous call
    pub fn take_last_durations(&self) -> HashMap<String, f64> {
        self.tables
            .read()
            .last_durations
            .iter()
            .filter_map(|(name, slot)| {
                let value = slot.swap(f64::NAN);
                (!value.is_nan()).then(|| (name.clone(), value))
            })
            .collect()
    }

    /// Report-only schedule on the configured segment interval
    #[must_use]
    pub fn scheduler(self: &Arc<Self>) -> ProfilerScheduler {
        let reporter = Arc::clone(self);
        ProfilerScheduler::new(
            "segments",
            self.ctx.config.timings.segment_report_interval(),
            move || {
                reporter.report();
            },
            Arc::clone(&self.ctx.profiler_lock),
            self.ctx.diagnostics,
        )
    }
}
