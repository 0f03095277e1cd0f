//! Agent lifecycle and host-facing API
//!
//! ```text
//!  Agent::start(config)
//!     │  latch (AtomicBool) ── already set? ─► Ok, nothing to do
//!     ▼
//!  validate config, resolve host, fingerprint process
//!     ▼
//!  Pipeline ─┬─ DeliveryQueue ── flush loop
//!            ├─ SegmentReporter ── report timer
//!            ├─ ErrorReporter ──── report timer
//!            ├─ ProcessReporter ── report timer
//!            └─ ProfileReporter* ─ record/report timers
//! ```
//!
//! Ingress calls (`record_segment`, `record_error`, ...) are no-ops until the
//! pipeline is published, and again after [`Agent::stop`].

use parking_lot::Mutex;
use stackpulse_common::{
    ERROR_GROUP_HANDLED_EXCEPTIONS, ERROR_GROUP_RECOVERED_PANICS, ERROR_GROUP_UNRECOVERED_PANICS,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::context::AgentContext;
use crate::delivery::{DeliveryQueue, Envelope, Transport};
use crate::diagnostics::Diagnostics;
use crate::domain::{AgentError, UnixTime};
use crate::identity::{build_id, IdGenerator};
use crate::profiling::{ProfileReporter, ProfileSource, ProfilerSettings};
use crate::reporting::{ErrorReporter, ProcessReporter, SegmentReporter};
use crate::{agent_error, agent_log};

/// Version stamped on every upload
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

struct Reporters {
    ctx: Arc<AgentContext>,
    segments: Arc<SegmentReporter>,
    errors: Arc<ErrorReporter>,
    process: Arc<ProcessReporter>,
    profilers: Vec<Arc<ProfileReporter>>,
}

impl Reporters {
    /// Every report once, under the profiler lock
    fn report_all(&self) {
        let _exclusive = self.ctx.profiler_lock.lock();
        self.segments.report();
        self.errors.report();
        self.process.report();
        for profiler in &self.profilers {
            if let Err(err) = profiler.report() {
                agent_error!(self.ctx.diagnostics, "{} report failed: {}", profiler.settings().name, err);
            }
        }
    }
}

struct Pipeline {
    reporters: Arc<Reporters>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Pipeline {
    fn ctx(&self) -> &AgentContext {
        &self.reporters.ctx
    }

    /// Run every report on the blocking pool, where waiting on the profiler lock is fine
    async fn report_all(&self) {
        let reporters = Arc::clone(&self.reporters);
        if let Err(err) = tokio::task::spawn_blocking(move || reporters.report_all()).await {
            agent_error!(self.ctx().diagnostics, "Reports failed: {}", err);
        }
    }
}

type Registration = (ProfilerSettings, Arc<dyn ProfileSource>);

pub struct Agent {
    transport: Arc<dyn Transport>,
    started: AtomicBool,
    pipeline: OnceLock<Pipeline>,
    registrations: Mutex<Vec<Registration>>,
}

impl Agent {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            started: AtomicBool::new(false),
            pipeline: OnceLock::new(),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Add a profiler to be scheduled when the agent starts
    ///
    /// # Errors
    /// [`AgentError::RegisteredAfterStart`] once `start` has been called,
    /// [`AgentError::InvalidProfiler`] for a zero interval or a record window
    /// longer than its interval
    pub fn register_profiler(
        &self,
        settings: ProfilerSettings,
        source: Arc<dyn ProfileSource>,
    ) -> Result<(), AgentError> {
        if self.started.load(Ordering::Acquire) {
            return Err(AgentError::RegisteredAfterStart(settings.name));
        }
        settings.validate()?;
        self.registrations.lock().push((settings, source));
        Ok(())
    }

    /// Build the pipeline and spawn its timers on the current Tokio runtime.
    ///
    /// Only the first successful call has any effect. A failed start releases
    /// the latch so a corrected configuration can be tried again.
    ///
    /// # Errors
    /// Invalid configuration or no Tokio runtime on this thread
    pub fn start(&self, config: AgentConfig) -> Result<(), AgentError> {
        if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Ok(());
        }

        match self.build(config) {
            Ok(pipeline) => {
                let pipeline = self.pipeline.get_or_init(|| pipeline);
                agent_log!(
                    pipeline.ctx().diagnostics,
                    "Agent started: app={} run={}",
                    pipeline.ctx().config.app_name,
                    pipeline.ctx().queue.envelope().run_id
                );
                Ok(())
            }
            Err(err) => {
                self.started.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn build(&self, mut config: AgentConfig) -> Result<Pipeline, AgentError> {
        tokio::runtime::Handle::try_current().map_err(|_| AgentError::NoRuntime)?;
        config.validate()?;
        config.resolve_host_name();

        let envelope = Envelope {
            agent_version: AGENT_VERSION.to_string(),
            app_name: config.app_name.clone(),
            app_version: config.app_version.clone(),
            app_environment: config.app_environment.clone(),
            host_name: config.host_name.clone(),
            process_id: std::process::id().to_string(),
            build_id: build_id(),
            run_id: IdGenerator::new().next_id().into_string(),
            run_ts: UnixTime::now().as_secs(),
        };
        let flush_interval = config.timings.flush_interval();
        let queue = Arc::new(DeliveryQueue::new(
            Arc::clone(&self.transport),
            envelope,
            config.timings.message_expiry_secs,
            Diagnostics::new(config.debug),
        ));
        let ctx = Arc::new(AgentContext::new(config, Arc::clone(&queue)));

        let segments = Arc::new(SegmentReporter::new(Arc::clone(&ctx)));
        let errors = Arc::new(ErrorReporter::new(Arc::clone(&ctx)));
        let process = Arc::new(ProcessReporter::new(Arc::clone(&ctx)));
        let profilers: Vec<Arc<ProfileReporter>> = self
            .registrations
            .lock()
            .drain(..)
            .map(|(settings, source)| Arc::new(ProfileReporter::new(Arc::clone(&ctx), settings, source)))
            .collect();

        let mut tasks = vec![queue.spawn_flush_loop(flush_interval)];
        tasks.extend(segments.scheduler().start());
        tasks.extend(errors.scheduler().start());
        tasks.extend(process.scheduler().start());
        for profiler in &profilers {
            tasks.extend(profiler.scheduler().start());
        }

        Ok(Pipeline {
            reporters: Arc::new(Reporters { ctx, segments, errors, process, profilers }),
            tasks: Mutex::new(tasks),
            stopped: AtomicBool::new(false),
        })
    }

    fn live(&self) -> Option<&Pipeline> {
        self.pipeline.get().filter(|p| !p.stopped.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live().is_some()
    }

    /// Run id of this process, once started
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.pipeline.get().map(|p| p.ctx().queue.envelope().run_id.as_str())
    }

    /// The outbound queue, once started
    #[must_use]
    pub fn queue(&self) -> Option<Arc<DeliveryQueue>> {
        self.pipeline.get().map(|p| Arc::clone(&p.ctx().queue))
    }

    /// Record one segment duration in milliseconds
    pub fn record_segment(&self, name: &str, duration_ms: f64) {
        if let Some(pipeline) = self.live() {
            pipeline.reporters.segments.record(name, duration_ms);
        }
    }

    /// Time a segment until the returned guard is stopped or dropped
    #[must_use]
    pub fn measure_segment(&self, name: &str) -> Segment<'_> {
        Segment { agent: self, name: name.to_owned(), started: Instant::now(), finished: false }
    }

    /// Latest duration of each segment recorded since the previous call
    #[must_use]
    pub fn last_segment_durations(&self) -> HashMap<String, f64> {
        self.live().map(|p| p.reporters.segments.take_last_durations()).unwrap_or_default()
    }

    pub fn record_error(&self, group: &str, err: &dyn fmt::Display) {
        if let Some(pipeline) = self.live() {
            pipeline.reporters.errors.record(group, &err.to_string());
        }
    }

    pub fn record_handled_error(&self, err: &dyn fmt::Display) {
        self.record_error(ERROR_GROUP_HANDLED_EXCEPTIONS, err);
    }

    /// Count a panic the host caught, e.g. via `std::panic::catch_unwind`
    pub fn record_recovered_panic(&self, message: &str) {
        self.record_error(ERROR_GROUP_RECOVERED_PANICS, &message);
    }

    /// Panic that unwound out of a task or thread, e.g. from a panic hook
    pub fn record_unrecovered_panic(&self, message: &str) {
        self.record_error(ERROR_GROUP_UNRECOVERED_PANICS, &message);
    }

    /// Run every report now, outside the timers
    pub async fn report_now(&self) {
        if let Some(pipeline) = self.live() {
            pipeline.report_all().await;
        }
    }

    /// Cancel the timers, report what is pending and make a last upload attempt
    ///
    /// An upload cut short by the cancellation puts its batch back on the
    /// queue, so the final flush sends it.
    pub async fn stop(&self) {
        let Some(pipeline) = self.live() else {
            return;
        };
        let tasks: Vec<_> = pipeline.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        pipeline.report_all().await;
        pipeline.stopped.store(true, Ordering::Release);

        let ctx = pipeline.ctx();
        if let Err(err) = ctx.queue.flush().await {
            agent_error!(ctx.diagnostics, "Final upload failed, {} messages left unsent: {}", ctx.queue.len(), err);
        }
        agent_log!(ctx.diagnostics, "Agent stopped");
    }
}

/// Guard timing one segment; records on [`Segment::stop`] or drop
pub struct Segment<'a> {
    agent: &'a Agent,
    name: String,
    started: Instant,
    finished: bool,
}

impl Segment<'_> {
    /// Record now and return the measured duration
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.finished {
            self.finished = true;
            self.agent.record_segment(&self.name, elapsed.as_secs_f64() * 1000.0);
        }
        elapsed
    }
}

impl Drop for Segment<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
