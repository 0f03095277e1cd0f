//! Scheduled profile reporting
//!
//! Snapshot profilers (heap) read the source once per report. Windowed
//! profilers (CPU, blocking) record short windows between reports, folding
//! each window into one accumulating tree that the report then averages.

#![allow(clippy::cast_precision_loss)]

use parking_lot::Mutex;
use stackpulse_common::{
    Category, MetricType, Trigger, Unit, NAME_BLOCKING_CALL_TIMES, NAME_CPU_USAGE, NAME_HEAP_ALLOCATION,
};
use std::sync::Arc;
use std::time::Duration;

use super::call_graph::{build_call_graph, is_agent_frame};
use super::source::ProfileSource;
use crate::breakdown::BreakdownNode;
use crate::context::AgentContext;
use crate::domain::{AgentError, ProfileError};
use crate::metric::Metric;
use crate::scheduler::ProfilerScheduler;
use crate::{agent_error, agent_log, system};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileMode {
    /// Read the current state at report time
    Snapshot,
    /// Record `duration` out of every `interval`, report the average window
    Windowed { interval: Duration, duration: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileScale {
    /// Report values as the source produced them
    Absolute,
    /// Multiply every value, e.g. `1e-6` for nanoseconds to milliseconds
    Factor(f64),
    /// Nanoseconds of CPU as a percentage of one window's CPU capacity
    CpuPercent,
}

/// Subtrees at `from_depth` or deeper outside `[min, max]` are dropped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueFilter {
    pub from_depth: usize,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerSettings {
    pub name: String,
    pub category: Category,
    pub unit: Unit,
    /// Sample column summed into node measurements
    pub value_type: String,
    /// Sample column summed into node sample counts
    pub count_type: String,
    pub mode: ProfileMode,
    pub report_interval: Duration,
    pub scale: ProfileScale,
    pub filter: Option<ValueFilter>,
}

impl ProfilerSettings {
    /// In-use heap by allocation site
    #[must_use]
    pub fn heap() -> Self {
        Self {
            name: NAME_HEAP_ALLOCATION.to_string(),
            category: Category::MemoryProfile,
            unit: Unit::Byte,
            value_type: "inuse_space".to_string(),
            count_type: "inuse_objects".to_string(),
            mode: ProfileMode::Snapshot,
            report_interval: Duration::from_secs(120),
            scale: ProfileScale::Absolute,
            filter: Some(ValueFilter { from_depth: 2, min: 10_000.0, max: f64::INFINITY }),
        }
    }

    /// On-CPU time by call path
    #[must_use]
    pub fn cpu() -> Self {
        Self {
            name: NAME_CPU_USAGE.to_string(),
            category: Category::CpuProfile,
            unit: Unit::Percent,
            value_type: "cpu".to_string(),
            count_type: "samples".to_string(),
            mode: ProfileMode::Windowed { interval: Duration::from_secs(10), duration: Duration::from_secs(2) },
            report_interval: Duration::from_secs(120),
            scale: ProfileScale::CpuPercent,
            filter: None,
        }
    }

    /// Time spent blocked by call path
    #[must_use]
    pub fn block() -> Self {
        Self {
            name: NAME_BLOCKING_CALL_TIMES.to_string(),
            category: Category::BlockProfile,
            unit: Unit::Millisecond,
            value_type: "delay".to_string(),
            count_type: "contentions".to_string(),
            mode: ProfileMode::Windowed { interval: Duration::from_secs(10), duration: Duration::from_secs(2) },
            report_interval: Duration::from_secs(120),
            scale: ProfileScale::Factor(1e-6),
            filter: None,
        }
    }

    /// Reject intervals the timers cannot run on
    ///
    /// # Errors
    /// [`AgentError::InvalidProfiler`] naming the offending setting
    pub fn validate(&self) -> Result<(), AgentError> {
        let reason = match self.mode {
            _ if self.report_interval.is_zero() => Some("report interval must be greater than zero"),
            ProfileMode::Windowed { interval, .. } if interval.is_zero() => {
                Some("record interval must be greater than zero")
            }
            ProfileMode::Windowed { interval, duration } if duration > interval => {
                Some("record duration must not exceed the record interval")
            }
            ProfileMode::Snapshot | ProfileMode::Windowed { .. } => None,
        };
        match reason {
            Some(reason) => Err(AgentError::InvalidProfiler { name: self.name.clone(), reason }),
            None => Ok(()),
        }
    }
}

/// Windows recorded since the last report
struct WindowState {
    profile: BreakdownNode,
    windows: u32,
}

impl WindowState {
    fn new() -> Self {
        Self { profile: BreakdownNode::root(), windows: 0 }
    }
}

pub struct ProfileReporter {
    ctx: Arc<AgentContext>,
    settings: ProfilerSettings,
    source: Arc<dyn ProfileSource>,
    window: Mutex<WindowState>,
    metric: Mutex<Metric>,
}

impl ProfileReporter {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>, settings: ProfilerSettings, source: Arc<dyn ProfileSource>) -> Self {
        let metric = ctx.metric(MetricType::Profile, settings.category, &settings.name, settings.unit);
        Self { ctx, settings, source, window: Mutex::new(WindowState::new()), metric: Mutex::new(metric) }
    }

    #[must_use]
    pub fn settings(&self) -> &ProfilerSettings {
        &self.settings
    }

    /// Record one window and fold it into the pending tree
    ///
    /// # Errors
    /// Propagates source and call-graph errors; the window is then discarded
    pub fn record(&self, duration: Duration) -> Result<(), ProfileError> {
        let profile = self.source.read_profile(Some(duration))?;
        let scratch = BreakdownNode::root();
        build_call_graph(&profile, &self.settings.value_type, &self.settings.count_type, &scratch)?;

        let mut window = self.window.lock();
        merge_into(&window.profile, &scratch);
        window.windows += 1;
        Ok(())
    }

    /// Finalize and queue one profile metric
    ///
    /// Returns `false` when a windowed profiler has nothing recorded yet.
    ///
    /// # Errors
    /// Propagates source and call-graph errors; nothing is queued then
    pub fn report(&self) -> Result<bool, ProfileError> {
        let (root, windows) = match self.settings.mode {
            ProfileMode::Snapshot => {
                let profile = self.source.read_profile(None)?;
                let root = BreakdownNode::root();
                build_call_graph(&profile, &self.settings.value_type, &self.settings.count_type, &root)?;
                (root, 1)
            }
            ProfileMode::Windowed { .. } => {
                let state = std::mem::replace(&mut *self.window.lock(), WindowState::new());
                if state.windows == 0 {
                    return Ok(false);
                }
                (state.profile, state.windows)
            }
        };

        if !self.ctx.config.profile_agent {
            root.filter_by_name(&|name: &str| !is_agent_frame(name));
        }
        root.propagate();
        if windows > 1 {
            root.normalize(f64::from(windows));
        }
        match (self.settings.scale, self.settings.mode) {
            (ProfileScale::Factor(factor), _) => root.scale(factor),
            (ProfileScale::CpuPercent, ProfileMode::Windowed { duration, .. }) => {
                let capacity = duration.as_nanos() as f64 * system::cpu_count() as f64;
                if capacity > 0.0 {
                    root.convert_to_percentage(capacity);
                }
            }
            (ProfileScale::Absolute | ProfileScale::CpuPercent, _) => {}
        }
        if let Some(filter) = self.settings.filter {
            root.filter_by_value(filter.from_depth, filter.min, filter.max);
        }

        let mut metric = self.metric.lock();
        let value = root.measurement();
        metric.create_observation(
            &self.ctx.ids,
            Trigger::Timer,
            value,
            self.settings.report_interval.as_secs(),
            Some(Arc::new(root)),
        );
        let queued = self.ctx.emit(&metric);
        agent_log!(self.ctx.diagnostics, "Reported {} profile over {} window(s)", self.settings.name, windows);
        Ok(queued)
    }

    /// Schedule for this profiler's mode, sharing the agent's profiler lock
    #[must_use]
    pub fn scheduler(self: &Arc<Self>) -> ProfilerScheduler {
        let diagnostics = self.ctx.diagnostics;
        let reporter = Arc::clone(self);
        let scheduler = ProfilerScheduler::new(
            &self.settings.name,
            self.settings.report_interval,
            move || {
                if let Err(err) = reporter.report() {
                    agent_error!(diagnostics, "{} report failed: {}", reporter.settings.name, err);
                }
            },
            Arc::clone(&self.ctx.profiler_lock),
            diagnostics,
        );

        match self.settings.mode {
            ProfileMode::Snapshot => scheduler,
            ProfileMode::Windowed { interval, duration } => {
                let reporter = Arc::clone(self);
                scheduler.with_record(interval, duration, move |window| {
                    if let Err(err) = reporter.record(window) {
                        agent_error!(diagnostics, "{} record failed: {}", reporter.settings.name, err);
                    }
                })
            }
        }
    }
}

/// Add `from`'s self values into `into`, creating missing nodes
fn merge_into(into: &BreakdownNode, from: &BreakdownNode) {
    into.increment(from.measurement(), from.sample_count());
    for child in from.children() {
        merge_into(&into.get_or_create_child(child.name()), &child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::delivery::{DeliveryQueue, Envelope, LogTransport, MessageBody};
    use crate::diagnostics::Diagnostics;
    use crate::profiling::source::{RawProfile, RawSample, SampleType, StackFrame};
    use stackpulse_common::MetricRecord;

    struct FixedSource(RawProfile);

    impl ProfileSource for FixedSource {
        fn read_profile(&self, _window: Option<Duration>) -> Result<RawProfile, ProfileError> {
            Ok(self.0.clone())
        }
    }

    fn context(profile_agent: bool) -> Arc<AgentContext> {
        let queue = Arc::new(DeliveryQueue::new(Arc::new(LogTransport), Envelope::default(), 600, Diagnostics::default()));
        Arc::new(AgentContext::new(AgentConfig { profile_agent, ..AgentConfig::for_app("shop") }, queue))
    }

    fn sample(frames: &[&str], values: Vec<i64>) -> RawSample {
        RawSample {
            frames: frames.iter().enumerate().map(|(i, f)| StackFrame::new(*f, "src/lib.rs", u32::try_from(i).unwrap())).collect(),
            values,
        }
    }

    fn queued(ctx: &AgentContext) -> Vec<MetricRecord> {
        ctx.queue
            .pending()
            .into_iter()
            .filter_map(|m| match m.body {
                MessageBody::Structured(v) => serde_json::from_value(v).ok(),
                MessageBody::Flattened(_) => None,
            })
            .collect()
    }

    fn heap_source() -> Arc<dyn ProfileSource> {
        Arc::new(FixedSource(RawProfile {
            sample_types: vec![SampleType::new("inuse_objects", "count"), SampleType::new("inuse_space", "bytes")],
            samples: vec![
                sample(&["shop::big_alloc", "shop::handler", "main"], vec![4, 50_000]),
                sample(&["shop::tiny_alloc", "shop::handler", "main"], vec![1, 16]),
                sample(&["stackpulse::delivery::flush", "main"], vec![1, 80_000]),
            ],
        }))
    }

    #[test]
    fn test_heap_report_filters_agent_frames_and_small_sites() {
        let ctx = context(false);
        let reporter = ProfileReporter::new(Arc::clone(&ctx), ProfilerSettings::heap(), heap_source());
        assert!(reporter.report().unwrap());

        let metrics = queued(&ctx);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, NAME_HEAP_ALLOCATION);
        assert_eq!(metrics[0].metric_type, MetricType::Profile);

        let measurement = metrics[0].measurement.as_ref().unwrap();
        assert!((measurement.value - 50_016.0).abs() < f64::EPSILON);

        let root = measurement.breakdown.as_ref().unwrap();
        let main = root.child("main (src/lib.rs:2)").unwrap();
        assert_eq!(main.children.len(), 1);
        let handler = main.child("shop::handler (src/lib.rs:1)").unwrap();
        assert!(handler.child("shop::big_alloc (src/lib.rs:0)").is_some());
        assert!(handler.child("shop::tiny_alloc (src/lib.rs:0)").is_none());
    }

    #[test]
    fn test_profile_agent_keeps_own_frames() {
        let ctx = context(true);
        let reporter = ProfileReporter::new(Arc::clone(&ctx), ProfilerSettings::heap(), heap_source());
        reporter.report().unwrap();

        let measurement = queued(&ctx)[0].measurement.clone().unwrap();
        assert!((measurement.value - 130_016.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_sample_type_aborts_report() {
        let ctx = context(false);
        let reporter = ProfileReporter::new(Arc::clone(&ctx), ProfilerSettings::cpu(), heap_source());
        reporter.record(Duration::from_millis(1)).unwrap_err();

        let snapshot = ProfilerSettings { value_type: "alloc_space".to_string(), ..ProfilerSettings::heap() };
        let reporter = ProfileReporter::new(Arc::clone(&ctx), snapshot, heap_source());
        let err = reporter.report().unwrap_err();
        assert!(matches!(err, ProfileError::MissingSampleType(ref t) if t == "alloc_space"));
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_windowed_report_averages_windows() {
        let ctx = context(false);
        let source: Arc<dyn ProfileSource> = Arc::new(FixedSource(RawProfile {
            sample_types: vec![SampleType::new("contentions", "count"), SampleType::new("delay", "nanoseconds")],
            samples: vec![sample(&["shop::lock_cart", "main"], vec![3, 9_000_000])],
        }));
        let reporter = ProfileReporter::new(Arc::clone(&ctx), ProfilerSettings::block(), source);

        assert!(!reporter.report().unwrap());

        for _ in 0..3 {
            reporter.record(Duration::from_millis(1)).unwrap();
        }
        assert!(reporter.report().unwrap());

        let measurement = queued(&ctx)[0].measurement.clone().unwrap();
        // 9ms per window, averaged over three windows
        assert!((measurement.value - 9.0).abs() < 1e-9);
        assert_eq!(measurement.breakdown.unwrap().sample_count, 3);

        // Windows were consumed
        assert!(!reporter.report().unwrap());
    }

    #[test]
    fn test_cpu_profile_reports_percent_of_capacity() {
        let ctx = context(false);
        let window = Duration::from_millis(100);
        let cpus = system::cpu_count() as f64;
        let busy = (window.as_nanos() as f64 * cpus / 2.0) as i64;
        let source: Arc<dyn ProfileSource> = Arc::new(FixedSource(RawProfile {
            sample_types: vec![SampleType::new("samples", "count"), SampleType::new("cpu", "nanoseconds")],
            samples: vec![sample(&["shop::hash", "main"], vec![10, busy])],
        }));
        let settings = ProfilerSettings {
            mode: ProfileMode::Windowed { interval: Duration::from_secs(1), duration: window },
            ..ProfilerSettings::cpu()
        };
        let reporter = ProfileReporter::new(Arc::clone(&ctx), settings, source);
        reporter.record(window).unwrap();
        reporter.report().unwrap();

        let measurement = queued(&ctx)[0].measurement.clone().unwrap();
        assert!((measurement.value - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_unschedulable_intervals() {
        assert!(ProfilerSettings::heap().validate().is_ok());
        assert!(ProfilerSettings::cpu().validate().is_ok());

        let cases = [
            ProfilerSettings { report_interval: Duration::ZERO, ..ProfilerSettings::heap() },
            ProfilerSettings {
                mode: ProfileMode::Windowed { interval: Duration::ZERO, duration: Duration::ZERO },
                ..ProfilerSettings::block()
            },
            ProfilerSettings {
                mode: ProfileMode::Windowed { interval: Duration::from_secs(1), duration: Duration::from_secs(2) },
                ..ProfilerSettings::cpu()
            },
        ];
        for settings in cases {
            let err = settings.validate().unwrap_err();
            assert!(
                matches!(err, AgentError::InvalidProfiler { ref name, .. } if *name == settings.name),
                "Unexpected error: {err}"
            );
        }
    }
}
