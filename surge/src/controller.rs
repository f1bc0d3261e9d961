//! Owns one run: validates, starts the scheduler and threshold watcher, and produces the report.
use crate::collector::MetricsCollector;
use crate::executor::{rate_limiter, VuContext};
use crate::http::HttpClient;
use crate::plan::RequestPlan;
use crate::scheduler::{Scheduler, SchedulerOutcome, StageProfile};
use crate::thresholds::{check_abort, evaluate_with_stats};
use crate::timer::Timer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{AbortReason, ConfigError, RunConfig, RunReport, ThresholdRule, ValidatedConfig};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

#[allow(unused_imports)]
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

/// Validate `config` and run it to completion against `client`.
///
/// Configuration problems are reported before any request is sent.
pub async fn run<C: HttpClient>(config: &RunConfig, client: C) -> Result<RunReport, ConfigError> {
    Ok(RunController::new(config, client)?.run().await)
}

pub struct RunController<C> {
    config: ValidatedConfig,
    plan: RequestPlan,
    client: Arc<C>,
}

impl<C: HttpClient> RunController<C> {
    pub fn new(config: &RunConfig, client: C) -> Result<Self, ConfigError> {
        Ok(Self::from_validated(config.validate()?, client))
    }

    pub fn from_validated(config: ValidatedConfig, client: C) -> Self {
        let plan = RequestPlan::from_specs(&config.requests);
        Self {
            config,
            plan,
            client: Arc::new(client),
        }
    }

    /// Replace the request plan derived from configuration, e.g. to use custom checks.
    pub fn with_plan(mut self, plan: RequestPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub async fn run(self) -> RunReport {
        self.run_until(std::future::pending()).await
    }

    /// Run until the load profile completes, an abort-on-fail rule trips, or `shutdown` resolves.
    /// In every case exactly one report is produced.
    pub async fn run_until<S>(self, shutdown: S) -> RunReport
    where
        S: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.execute(run_id, shutdown).instrument(span).await
    }

    async fn execute<S>(self, run_id: Uuid, shutdown: S) -> RunReport
    where
        S: Future<Output = ()>,
    {
        let Self {
            config,
            plan,
            client,
        } = self;

        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();
        info!(
            "Starting run against {} with {} thresholds",
            config.base_url,
            config.thresholds.len()
        );

        let collector = MetricsCollector::new(config.exact_percentile_limit);
        let ctx = VuContext {
            client,
            plan: Arc::new(plan),
            collector: collector.clone(),
            limiter: config.max_rps.map(|rps| Arc::new(rate_limiter(rps))),
            request_timeout: config.request_timeout,
            pace: config.pace,
        };

        let (stop_tx, stop_rx) = watch::channel(None);
        let stop_tx = Arc::new(stop_tx);

        let scheduler = Scheduler::new(
            StageProfile::new(config.stages.clone()),
            ctx,
            config.scheduler_tick,
            config.graceful_stop,
        );
        let mut scheduler_task = tokio::spawn(scheduler.run(stop_rx).in_current_span());

        let watcher = tokio::spawn(
            watch_thresholds(
                config.thresholds.clone(),
                collector.clone(),
                config.threshold_check_interval,
                start,
                stop_tx.clone(),
            )
            .in_current_span(),
        );

        tokio::pin!(shutdown);
        let res = tokio::select! {
            res = &mut scheduler_task => res,
            _ = &mut shutdown => {
                warn!("Interrupted; stopping virtual users");
                publish_stop(&stop_tx, AbortReason::Interrupted);
                scheduler_task.await
            }
        };
        watcher.abort();

        let outcome = res.unwrap_or_else(|err| {
            error!("Scheduler failed: {err}");
            SchedulerOutcome::default()
        });
        if outcome.forced_stops > 0 {
            warn!(
                "{} users were aborted mid-request; their in-flight samples are lost",
                outcome.forced_stops
            );
        }
        let aborted = stop_tx.borrow().clone();

        let snapshots = collector.snapshot_all();
        let mut report = RunReport {
            run_id,
            started_at,
            duration: start.elapsed(),
            max_vus: outcome.max_vus,
            iterations: outcome.iterations,
            aborted,
            ..evaluate_with_stats(&config.thresholds, &snapshots, &config.summary_trend_stats)
        };
        if matches!(report.aborted, Some(AbortReason::Threshold { .. })) {
            report.passed = false;
        }

        for result in report.failed_rules() {
            warn!("Threshold {result}");
        }
        info!(
            "Run finished in {}: {}",
            humantime::format_duration(Duration::from_millis(report.duration.as_millis() as u64)),
            if report.passed { "passed" } else { "failed" }
        );

        report
    }
}

/// Only the first stop reason sticks.
fn publish_stop(stop: &watch::Sender<Option<AbortReason>>, reason: AbortReason) {
    stop.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

#[instrument(name = "thresholds", skip_all)]
async fn watch_thresholds(
    rules: Vec<ThresholdRule>,
    collector: MetricsCollector,
    interval: Duration,
    start: Instant,
    stop: Arc<watch::Sender<Option<AbortReason>>>,
) {
    if !rules.iter().any(|r| r.abort_on_fail) {
        trace!("No abort-on-fail rules to watch");
        return;
    }

    let mut timer = Timer::new(interval).await;
    debug!("Checking abort-on-fail rules every {timer}");
    loop {
        timer.tick().await;
        if let Some(result) = check_abort(&rules, &collector, start.elapsed()) {
            warn!("Aborting run: threshold {result}");
            publish_stop(
                &stop,
                AbortReason::Threshold {
                    rule: format!("{}: {}", result.metric, result.expression()),
                },
            );
            return;
        }
    }
}
