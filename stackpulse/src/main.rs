//! # stackpulse-demo
//!
//! Attaches the agent to a small synthetic workload: a few tasks that time
//! `checkout` / `inventory` segments, fail now and then, and a fake allocation
//! profile. Uploads go to the log (default) or to a JSON lines file
//! (`--output`). Runs until `--duration` elapses or Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stackpulse::cli::Args;
use stackpulse::domain::{AgentError, ProfileError};
use stackpulse::profiling::{RawSample, SampleType, StackFrame};
use stackpulse::{
    Agent, AgentConfig, JsonLinesTransport, LogTransport, ProfileSource, ProfilerSettings, RawProfile, Transport,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AgentError>() {
        Some(AgentError::InvalidConfig(_)) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

/// Merge the optional config file with command-line overrides
fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(name) = &args.app_name {
        config.app_name.clone_from(name);
    }
    if let Some(secs) = args.report_every {
        let ms = secs.saturating_mul(1000);
        config.timings.segment_report_interval_ms = ms;
        config.timings.error_report_interval_ms = ms;
        config.timings.process_report_interval_ms = ms;
    }
    config.debug |= args.debug;
    Ok(config)
}

/// Allocation sites of an imaginary shop backend
struct SyntheticHeap;

impl ProfileSource for SyntheticHeap {
    fn read_profile(&self, _window: Option<Duration>) -> Result<RawProfile, ProfileError> {
        let mut rng = rand::thread_rng();
        let site = |function: &str, line: u32| StackFrame::new(function, "src/shop.rs", line);
        let main = StackFrame::new("shop::main", "src/main.rs", 12);
        Ok(RawProfile {
            sample_types: vec![SampleType::new("inuse_objects", "count"), SampleType::new("inuse_space", "bytes")],
            samples: vec![
                RawSample {
                    frames: vec![site("shop::cart::grow", 88), site("shop::checkout", 40), main.clone()],
                    values: vec![rng.gen_range(10..50), rng.gen_range(200_000..400_000)],
                },
                RawSample {
                    frames: vec![site("shop::inventory::load", 130), main],
                    values: vec![rng.gen_range(1..5), rng.gen_range(20_000..90_000)],
                },
            ],
        })
    }
}

async fn workload(agent: Arc<Agent>, worker: usize) {
    loop {
        let (segment, pause, failed) = {
            let mut rng = rand::thread_rng();
            let segment = if rng.gen_bool(0.7) { "checkout" } else { "inventory" };
            (segment, Duration::from_millis(rng.gen_range(5..60)), rng.gen_bool(0.05))
        };

        let timer = agent.measure_segment(segment);
        tokio::time::sleep(pause).await;
        timer.stop();

        if failed {
            agent.record_handled_error(&format!("worker {worker}: {segment} timed out"));
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let transport: Arc<dyn Transport> = match &args.output {
        Some(path) => {
            info!("Writing uploads to {}", path.display());
            Arc::new(JsonLinesTransport::new(path))
        }
        None => Arc::new(LogTransport),
    };

    let agent = Arc::new(Agent::new(transport));
    agent.register_profiler(ProfilerSettings::heap(), Arc::new(SyntheticHeap))?;
    agent.start(config)?;
    info!("Agent running, run id {}", agent.run_id().unwrap_or("-"));

    let workers: Vec<_> = (0..4).map(|w| tokio::spawn(workload(Arc::clone(&agent), w))).collect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let limit = if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };

    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Duration limit reached");
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(250)) => {}
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {e}");
                }
                break;
            }
        }
    }

    for worker in &workers {
        worker.abort();
    }
    agent.stop().await;
    info!("Stopped after {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"app_name": "from-file", "debug": false}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args = Args::try_parse_from(["stackpulse-demo", "--config", &path, "--app-name", "cli", "--report-every", "3", "-d"])
            .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.app_name, "cli");
        assert!(config.debug);
        assert_eq!(config.timings.segment_report_interval_ms, 3000);
    }

    #[test]
    fn test_invalid_config_maps_to_usage_exit() {
        let err = anyhow::Error::from(AgentError::InvalidConfig(stackpulse::domain::ConfigError::MissingField("app_name")));
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_ERROR);
    }

    #[test]
    fn test_synthetic_heap_has_expected_columns() {
        let profile = SyntheticHeap.read_profile(None).unwrap();
        assert_eq!(profile.column("inuse_space"), Some(1));
        assert_eq!(profile.samples.len(), 2);
    }
}
