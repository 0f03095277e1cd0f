//! Periodic record/report driver for one profiler
//!
//! ```text
//!  record timer (every interval)          report timer (every report_interval)
//!  ─────────────────────────────          ────────────────────────────────────
//!  tick ─► sleep rand[0, interval-dur)    tick
//!       ─► spawn_blocking {                   ─► spawn_blocking {
//!            lock(profiler_lock)                   lock(profiler_lock)
//!            record(duration)                      report()
//!          }                                     }
//! ```
//!
//! Both timers first fire one period after [`ProfilerScheduler::start`]. The
//! timer loops never await a callback, so a slow or panicking callback cannot
//! stall the cadence. Panics surface as [`JoinError`]s and are logged.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::agent_error;
use crate::diagnostics::Diagnostics;

pub type RecordFn = Arc<dyn Fn(Duration) + Send + Sync>;
pub type ReportFn = Arc<dyn Fn() + Send + Sync>;

struct RecordSchedule {
    interval: Duration,
    duration: Duration,
    callback: RecordFn,
}

pub struct ProfilerScheduler {
    name: Arc<str>,
    record: Option<RecordSchedule>,
    report_interval: Duration,
    report: ReportFn,
    profiler_lock: Arc<Mutex<()>>,
    diagnostics: Diagnostics,
}

impl ProfilerScheduler {
    pub fn new(
        name: &str,
        report_interval: Duration,
        report: impl Fn() + Send + Sync + 'static,
        profiler_lock: Arc<Mutex<()>>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            name: Arc::from(name),
            record: None,
            report_interval,
            report: Arc::new(report),
            profiler_lock,
            diagnostics,
        }
    }

    /// Also run `record(duration)` every `interval`, after a random delay
    #[must_use]
    pub fn with_record(
        mut self,
        interval: Duration,
        duration: Duration,
        record: impl Fn(Duration) + Send + Sync + 'static,
    ) -> Self {
        self.record = Some(RecordSchedule { interval, duration, callback: Arc::new(record) });
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper bound (exclusive) of the random delay before each record action
    #[must_use]
    pub fn max_jitter(&self) -> Option<Duration> {
        self.record.as_ref().map(|r| r.interval.saturating_sub(r.duration))
    }

    /// Spawn the timer tasks on the current Tokio runtime
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime
    #[must_use]
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(2);

        if let Some(record) = self.record {
            let name = Arc::clone(&self.name);
            let lock = Arc::clone(&self.profiler_lock);
            let diagnostics = self.diagnostics;
            tasks.push(tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                let max_delay = record.interval.saturating_sub(record.duration);
                let mut ticker = interval_at(Instant::now() + record.interval, record.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tokio::time::sleep(jitter(&mut rng, max_delay)).await;
                    let callback = Arc::clone(&record.callback);
                    let duration = record.duration;
                    run_guarded(&name, "record", &lock, diagnostics, move || callback(duration));
                }
            }));
        }

        let name = self.name;
        let lock = self.profiler_lock;
        let diagnostics = self.diagnostics;
        let report = self.report;
        let period = self.report_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let callback = Arc::clone(&report);
                run_guarded(&name, "report", &lock, diagnostics, move || callback());
            }
        }));

        tasks
    }
}

fn jitter(rng: &mut StdRng, max: Duration) -> Duration {
    let max_nanos = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if max_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rng.gen_range(0..max_nanos))
}

/// Run `job` on the blocking pool under the profiler lock, logging any panic
fn run_guarded(
    name: &Arc<str>,
    action: &'static str,
    lock: &Arc<Mutex<()>>,
    diagnostics: Diagnostics,
    job: impl FnOnce() + Send + 'static,
) {
    let lock = Arc::clone(lock);
    let handle = tokio::task::spawn_blocking(move || {
        let _exclusive = lock.lock();
        job();
    });

    let name = Arc::clone(name);
    tokio::spawn(async move {
        if let Err(err) = handle.await {
            agent_error!(diagnostics, "{} {} failed: {}", name, action, describe(err));
        }
    });
}

fn describe(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    panic_message(&*err.into_panic())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
