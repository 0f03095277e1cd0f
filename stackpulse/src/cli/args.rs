//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "stackpulse-demo",
    about = "Run a synthetic workload with the stackpulse agent attached",
    after_help = "\
EXAMPLES:
    stackpulse-demo --app-name shop                      Log uploads to stderr
    stackpulse-demo --app-name shop --output up.jsonl    Append uploads as JSON lines
    stackpulse-demo --config agent.json --duration 30    Load options from a file"
)]
pub struct Args {
    /// Application name reported with every metric
    #[arg(long, value_name = "NAME")]
    pub app_name: Option<String>,

    /// JSON agent configuration (command-line flags take precedence)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append uploads to this file as JSON lines instead of logging them
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Report and flush every N seconds instead of the production intervals
    #[arg(long, value_name = "SECS")]
    pub report_every: Option<u64>,

    /// Enable agent diagnostics
    #[arg(short, long)]
    pub debug: bool,
}
