use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use surge_core::{AbortReason, RunReport};

pub const DEFAULT_LOG_FILTER: &str = "surge=info";

#[derive(Parser, Debug)]
#[command(name = "surge", version, about = "Staged HTTP load generator")]
pub struct Cli {
    /// Log filter directives, e.g. `surge=debug`. Logs go to stderr.
    #[arg(long, global = true, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test and evaluate its thresholds.
    Run(RunArgs),
    /// Check a config file without sending any requests.
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the JSON run config.
    pub config: PathBuf,

    /// Override the config's base URL.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Also write the JSON report to this file.
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Print the report as JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Serve Prometheus metrics on this address while the run is going.
    #[arg(long)]
    pub prometheus_listen: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    pub config: PathBuf,

    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Passed,
    Error,
    ThresholdsFailed,
    InvalidConfig,
    Interrupted,
}

impl ExitStatus {
    pub fn from_report(report: &RunReport) -> Self {
        match (&report.aborted, report.passed) {
            (Some(AbortReason::Interrupted), _) => ExitStatus::Interrupted,
            (_, false) => ExitStatus::ThresholdsFailed,
            (_, true) => ExitStatus::Passed,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Passed => 0,
            ExitStatus::Error => 1,
            ExitStatus::ThresholdsFailed => 99,
            ExitStatus::InvalidConfig => 104,
            ExitStatus::Interrupted => 105,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
