use crate::{Comparator, Statistic};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Summary of a finished (or aborted) run. Produced exactly once per run.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub duration: Duration,
    pub max_vus: usize,
    pub iterations: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<RuleResult>,
    pub aborted: Option<AbortReason>,
    pub passed: bool,
}

impl RunReport {
    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleResult> {
        self.thresholds.iter().filter(|r| !r.passed)
    }
}

/// Aggregates of one metric. Latency figures are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub count: u64,
    pub failures: u64,
    pub rate: f64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    /// Further percentiles requested through `summaryTrendStats`, keyed like `p(97.5)`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub percentiles: BTreeMap<String, f64>,
}

impl MetricSummary {
    /// Look up a statistic that the summary carries.
    pub fn get(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Avg => Some(self.avg),
            Statistic::Min => Some(self.min),
            Statistic::Max => Some(self.max),
            Statistic::Med => Some(self.med),
            Statistic::Count => Some(self.count as f64),
            Statistic::Rate => Some(self.rate),
            Statistic::PassRate => Some(1. - self.rate),
            Statistic::Percentile(q) if q == 50. => Some(self.med),
            Statistic::Percentile(q) if q == 90. => Some(self.p90),
            Statistic::Percentile(q) if q == 95. => Some(self.p95),
            Statistic::Percentile(q) if q == 99. => Some(self.p99),
            Statistic::Percentile(_) => self.percentiles.get(&statistic.to_string()).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub metric: String,
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub bound: f64,
    /// `None` when the metric was never recorded.
    pub actual: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
    pub reason: Option<String>,
}

impl RuleResult {
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.statistic, self.comparator, self.bound)
    }
}

impl fmt::Display for RuleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "passed" } else { "FAILED" };
        write!(f, "{}: {} {verdict}", self.metric, self.expression())?;
        match (&self.actual, &self.reason) {
            (_, Some(reason)) => write!(f, " ({reason})"),
            (Some(actual), None) => write!(f, " (actual: {actual:.4})"),
            (None, None) => Ok(()),
        }
    }
}

/// Why a run stopped before its load profile finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AbortReason {
    Threshold { rule: String },
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Threshold { rule } => write!(f, "threshold `{rule}` failed"),
            AbortReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let summary = MetricSummary {
            count: 100,
            failures: 2,
            rate: 0.02,
            avg: 12.5,
            min: 1.,
            med: 10.,
            max: 250.,
            p90: 20.,
            p95: 40.,
            p99: 200.,
            percentiles: BTreeMap::from([("p(97.5)".to_string(), 120.)]),
        };

        RunReport {
            run_id: Uuid::new_v4(),
            started_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            duration: Duration::from_millis(60_250),
            max_vus: 10,
            iterations: 100,
            metrics: BTreeMap::from([("http_req_failed".to_string(), summary)]),
            checks: vec![CheckSummary {
                name: "status is 200".to_string(),
                passes: 98,
                fails: 2,
            }],
            thresholds: vec![
                RuleResult {
                    metric: "http_req_failed".to_string(),
                    statistic: Statistic::Rate,
                    comparator: Comparator::Lt,
                    bound: 0.01,
                    actual: Some(0.02),
                    passed: false,
                    abort_on_fail: false,
                    reason: None,
                },
                RuleResult {
                    metric: "nonexistent_metric".to_string(),
                    statistic: Statistic::Percentile(95.),
                    comparator: Comparator::Le,
                    bound: 500.,
                    actual: None,
                    passed: false,
                    abort_on_fail: true,
                    reason: Some(crate::METRIC_MISSING.to_string()),
                },
            ],
            aborted: Some(AbortReason::Threshold {
                rule: "http_req_failed: rate<0.01".to_string(),
            }),
            passed: false,
        }
    }

    #[test]
    fn report_survives_json() {
        let report = report();
        let json = serde_json::to_string_pretty(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();

        let verdicts = |r: &RunReport| r.thresholds.iter().map(|t| t.passed).collect::<Vec<_>>();
        assert_eq!(verdicts(&back), verdicts(&report));
        assert_eq!(back.passed, report.passed);
        assert_eq!(back, report);
    }

    #[test]
    fn rule_display() {
        let report = report();
        assert_eq!(
            report.thresholds[0].to_string(),
            "http_req_failed: rate<0.01 FAILED (actual: 0.0200)"
        );
        assert_eq!(
            report.thresholds[1].to_string(),
            "nonexistent_metric: p(95)<=500 FAILED (metric missing)"
        );
        assert_eq!(report.failed_rules().count(), 2);
    }

    #[test]
    fn summary_lookup() {
        let summary = report().metrics["http_req_failed"].clone();
        let pass_rate = summary.get(Statistic::PassRate).unwrap();
        assert!((pass_rate - 0.98).abs() < 1e-12);
        assert_eq!(summary.get(Statistic::Percentile(95.)), Some(40.));
        assert_eq!(summary.get(Statistic::Percentile(97.5)), Some(120.));
        assert_eq!(summary.get(Statistic::Percentile(75.)), None);
    }
}
