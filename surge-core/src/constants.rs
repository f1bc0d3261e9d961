use std::time::Duration;

/// Latency of every request which received a response.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";

/// One sample per request; failed on transport errors and status codes >= 400.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";

/// One sample per check evaluation.
pub const CHECKS: &str = "checks";

/// One sample per completed iteration of the request plan.
pub const ITERATION_DURATION: &str = "iteration_duration";

/// Reason attached to threshold results whose metric was never recorded.
pub const METRIC_MISSING: &str = "metric missing";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PACE: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_THRESHOLD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for any configured duration and for the sum of all stages.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-metric sample count up to which percentiles are computed exactly.
pub const DEFAULT_EXACT_PERCENTILE_LIMIT: usize = 10_000;

pub const DEFAULT_SUMMARY_TREND_STATS: &[&str] = &["avg", "min", "med", "max", "p(90)", "p(95)", "p(99)"];

/// Name a metric is recorded under when tagged with a request or check name.
pub fn tagged_metric(metric: &str, tag: &str) -> String {
    format!("{metric}{{{tag}}}")
}
