//! A virtual user: one concurrent loop issuing the request plan until it is retired.
use crate::collector::MetricsCollector;
use crate::http::{HttpClient, HttpResponse, TransportError};
use crate::plan::{PlannedRequest, RequestPlan};
use crate::template::TemplateContext;
use crate::timed::TimedExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{
    tagged_metric, Outcome, Sample, CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    ITERATION_DURATION,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// Slack given to a client on top of the request timeout before the request is abandoned.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Everything virtual users share.
pub(crate) struct VuContext<C> {
    pub client: Arc<C>,
    pub plan: Arc<RequestPlan>,
    pub collector: MetricsCollector,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
    pub request_timeout: Duration,
    pub pace: Duration,
}

impl<C> Clone for VuContext<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            plan: self.plan.clone(),
            collector: self.collector.clone(),
            limiter: self.limiter.clone(),
            request_timeout: self.request_timeout,
            pace: self.pace,
        }
    }
}

pub(crate) fn rate_limiter(max_rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(max_rps).allow_burst(NonZeroU32::MIN))
}

/// Handle the scheduler keeps per running virtual user.
pub(crate) struct VuHandle {
    pub id: u64,
    retire: watch::Sender<bool>,
    pub task: JoinHandle<u64>,
}

impl VuHandle {
    /// Ask the virtual user to stop at its next request boundary.
    pub fn retire(&self) {
        // A send error means the task already exited.
        let _ = self.retire.send(true);
    }
}

pub(crate) struct VirtualUser<C> {
    id: u64,
    ctx: VuContext<C>,
    retire: watch::Receiver<bool>,
    iteration: u64,
}

impl<C: HttpClient> VirtualUser<C> {
    pub fn spawn(id: u64, ctx: VuContext<C>) -> VuHandle {
        let (tx, rx) = watch::channel(false);
        let vu = Self {
            id,
            ctx,
            retire: rx,
            iteration: 0,
        };

        VuHandle {
            id,
            retire: tx,
            task: tokio::spawn(vu.run().in_current_span()),
        }
    }

    fn retired(&self) -> bool {
        *self.retire.borrow()
    }

    /// Returns the number of completed iterations.
    #[instrument(name = "vu", skip_all, fields(id = self.id))]
    async fn run(mut self) -> u64 {
        trace!("Virtual user started");
        while !self.retired() {
            if !self.iterate().await {
                break;
            }
            self.iteration += 1;

            if self.ctx.pace.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.pace) => {}
                res = self.retire.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        trace!("Virtual user retired after {} iterations", self.iteration);
        self.iteration
    }

    /// Run the plan once. Returns `false` when retired part way through.
    async fn iterate(&mut self) -> bool {
        let start = Instant::now();
        let plan = self.ctx.plan.clone();

        for (index, request) in plan.requests.iter().enumerate() {
            if index > 0 && self.retired() {
                return false;
            }
            if !self.acquire().await {
                return false;
            }
            self.request_cycle(request).await;
        }

        self.ctx
            .collector
            .record(ITERATION_DURATION, &Sample::success(start.elapsed()));
        true
    }

    /// Wait for the shared rate limiter, if any. Returns `false` when retired while waiting.
    async fn acquire(&mut self) -> bool {
        let Some(limiter) = self.ctx.limiter.clone() else {
            return true;
        };

        loop {
            tokio::select! {
                _ = limiter.until_ready() => return true,
                res = self.retire.changed() => {
                    if res.is_err() || self.retired() {
                        return false;
                    }
                }
            }
        }
    }

    async fn request_cycle(&self, request: &PlannedRequest) {
        let ctx = TemplateContext {
            vu: self.id,
            iteration: self.iteration,
        };
        let http_request = request.render(&ctx);
        let url = http_request.url.clone();
        let timeout = self.ctx.request_timeout;

        let (result, elapsed) =
            tokio::time::timeout(timeout + TIMEOUT_GRACE, self.ctx.client.send(http_request, timeout))
                .timed()
                .await;
        let result = result.unwrap_or(Err(TransportError::Timeout(timeout)));

        match &result {
            Ok(response) => {
                let outcome = status_outcome(response.status);
                let sample = Sample::new(response.duration, outcome);
                self.record(HTTP_REQ_DURATION, request, &sample);
                self.record(HTTP_REQ_FAILED, request, &sample);
                if let Some(trend) = &request.trend {
                    self.ctx.collector.record(trend, &sample);
                }
            }
            Err(err) => {
                debug!("Request to {url} failed: {err}");
                let sample = Sample::failure(elapsed, err.to_string());
                self.record(HTTP_REQ_FAILED, request, &sample);
            }
        }

        let response: Option<&HttpResponse> = result.as_ref().ok();
        for check in &request.checks {
            let passed = check.evaluate(response);
            let outcome = Outcome::from_bool(passed, || format!("check `{}` failed", check.name()));
            let sample = Sample::new(Duration::ZERO, outcome);
            self.ctx.collector.record(CHECKS, &sample);
            self.ctx
                .collector
                .record(&tagged_metric(CHECKS, check.name()), &sample);
        }
    }

    fn record(&self, metric: &str, request: &PlannedRequest, sample: &Sample) {
        self.ctx.collector.record(metric, sample);
        if let Some(name) = &request.name {
            self.ctx
                .collector
                .record(&tagged_metric(metric, name), sample);
        }
    }
}

fn status_outcome(status: u16) -> Outcome {
    Outcome::from_bool(status < 400, || format!("status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Check;
    use crate::http::{BoxFuture, HttpRequest};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Answers every request after a fixed latency; every `fail_every`-th request times out.
    struct ScriptedClient {
        latency: Duration,
        fail_every: u64,
        calls: AtomicU64,
    }

    impl HttpClient for ScriptedClient {
        fn send(
            &self,
            _request: HttpRequest,
            timeout: Duration,
        ) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if self.fail_every > 0 && n % self.fail_every == 0 {
                    tokio::time::sleep(timeout).await;
                    return Err(TransportError::Timeout(timeout));
                }
                tokio::time::sleep(self.latency).await;
                Ok(HttpResponse::new(200, self.latency))
            })
        }
    }

    fn context(fail_every: u64, plan: RequestPlan) -> (VuContext<ScriptedClient>, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient {
            latency: Duration::from_millis(100),
            fail_every,
            calls: AtomicU64::new(0),
        });
        let ctx = VuContext {
            client: client.clone(),
            plan: Arc::new(plan),
            collector: MetricsCollector::new(10_000),
            limiter: None,
            request_timeout: Duration::from_secs(2),
            pace: Duration::from_secs(1),
        };
        (ctx, client)
    }

    fn checked_plan() -> RequestPlan {
        RequestPlan::new(vec![PlannedRequest::get("http://localhost/api/info")
            .name("info")
            .check(Check::status("status is 200", 200))])
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn records_every_request_cycle() {
        let (ctx, client) = context(0, checked_plan());
        let collector = ctx.collector.clone();

        let handle = VirtualUser::spawn(1, ctx);
        // Each iteration takes 100ms of latency plus 1s of pace.
        tokio::time::sleep(Duration::from_millis(5_050)).await;
        handle.retire();
        let iterations = handle.task.await.unwrap();

        assert_eq!(iterations, 5);
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);

        let duration = collector.snapshot(HTTP_REQ_DURATION).unwrap();
        assert_eq!(duration.count(), 5);
        assert!((duration.avg() - 100.).abs() < 1e-9);
        assert_eq!(collector.snapshot("http_req_duration{info}").unwrap().count(), 5);
        assert_eq!(collector.snapshot(HTTP_REQ_FAILED).unwrap().rate(), 0.);
        assert_eq!(collector.snapshot(CHECKS).unwrap().pass_rate(), 1.);
        assert_eq!(collector.snapshot(ITERATION_DURATION).unwrap().count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_samples() {
        let (ctx, _) = context(2, checked_plan());
        let collector = ctx.collector.clone();

        let handle = VirtualUser::spawn(1, ctx);
        tokio::time::sleep(Duration::from_secs(20)).await;
        handle.retire();
        let iterations = handle.task.await.unwrap();
        assert!(iterations >= 4);

        let failed = collector.snapshot(HTTP_REQ_FAILED).unwrap();
        let duration = collector.snapshot(HTTP_REQ_DURATION).unwrap();
        assert_eq!(failed.count(), iterations);
        assert_eq!(failed.failures(), iterations / 2);
        // Timed out requests have no response and thus no duration sample.
        assert_eq!(duration.count(), iterations - iterations / 2);

        let checks = collector.snapshot("checks{status is 200}").unwrap();
        assert_eq!(checks.failures(), iterations / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retirement_waits_for_in_flight_request() {
        let (mut ctx, client) = context(0, checked_plan());
        ctx.pace = Duration::ZERO;
        let collector = ctx.collector.clone();

        let handle = VirtualUser::spawn(3, ctx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.retire();
        let iterations = handle.task.await.unwrap();

        // The first request was in flight when retired; it still completes and is recorded.
        assert_eq!(iterations, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(collector.snapshot(HTTP_REQ_DURATION).unwrap().count(), 1);
    }

    #[test]
    fn error_statuses_fail() {
        assert!(status_outcome(200).is_success());
        assert!(status_outcome(302).is_success());
        assert!(!status_outcome(404).is_success());
        assert_eq!(status_outcome(503), Outcome::failure("status 503"));
    }
}
