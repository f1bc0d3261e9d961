mod cli;
mod report;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, ExitStatus, RunArgs, ValidateArgs, DEFAULT_LOG_FILTER};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::process::ExitCode;
use surge::http::ReqwestClient;
use surge::{RunController, StageProfile};
use surge_core::{ConfigError, RunConfig, ValidatedConfig};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let res = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Validate(args) => validate(args),
    };

    match res {
        Ok(status) => status.into(),
        Err(err) => {
            error!("{err:#}");
            ExitStatus::Error.into()
        }
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("Ignoring invalid log filter `{filter}`: {err}");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    });

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path, base_url: Option<String>) -> Result<ValidatedConfig, ConfigError> {
    let mut config = RunConfig::from_path(path)?;
    if let Some(base_url) = base_url {
        debug!("Overriding base URL with {base_url}");
        config.base_url = base_url;
    }
    config.validate()
}

fn validate(args: ValidateArgs) -> anyhow::Result<ExitStatus> {
    match load(&args.config, args.base_url) {
        Ok(config) => {
            let total = StageProfile::new(config.stages.clone()).total_duration();
            println!(
                "{}: {} stages over {}, {} requests per iteration, {} thresholds",
                args.config.display(),
                config.stages.len(),
                humantime::format_duration(total),
                config.requests.len(),
                config.thresholds.len()
            );
            Ok(ExitStatus::Passed)
        }
        Err(err) => {
            error!("Invalid config {}: {err}", args.config.display());
            Ok(ExitStatus::InvalidConfig)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitStatus> {
    let config = match load(&args.config, args.base_url) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid config {}: {err}", args.config.display());
            return Ok(ExitStatus::InvalidConfig);
        }
    };

    if let Some(addr) = args.prometheus_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Serving Prometheus metrics on {addr}");
    }

    let trend_stats = config.summary_trend_stats.clone();
    let client = ReqwestClient::new().context("failed to build HTTP client")?;
    let report = RunController::from_validated(config, client)
        .run_until(interrupted())
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report::render(&report, &trend_stats));
    }

    if let Some(path) = &args.summary_export {
        report::export(&report, path)?;
        info!("Report written to {}", path.display());
    }

    Ok(ExitStatus::from_report(&report))
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}
