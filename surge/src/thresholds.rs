//! Pass/fail evaluation of threshold rules against metric snapshots.
use crate::collector::{MetricsCollector, RunningStats};
use std::collections::BTreeMap;
use std::time::Duration;
use surge_core::{
    CheckSummary, RuleResult, RunReport, Statistic, ThresholdRule, CHECKS, METRIC_MISSING,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub fn evaluate_rule(rule: &ThresholdRule, stats: Option<&RunningStats>) -> RuleResult {
    let (actual, passed, reason) = match stats {
        Some(stats) => {
            let actual = stats.stat(rule.statistic);
            (Some(actual), rule.holds(actual), None)
        }
        None => (None, false, Some(METRIC_MISSING.to_string())),
    };

    RuleResult {
        metric: rule.metric.clone(),
        statistic: rule.statistic,
        comparator: rule.comparator,
        bound: rule.bound,
        actual,
        passed,
        abort_on_fail: rule.abort_on_fail,
        reason,
    }
}

/// Evaluate every rule against final snapshots. The run passes only if every rule passes.
///
/// Run-level fields (`run_id`, `started_at`, `duration`, `max_vus`, `iterations`, `aborted`) are
/// left empty for the caller to fill in.
pub fn evaluate(rules: &[ThresholdRule], snapshots: &BTreeMap<String, RunningStats>) -> RunReport {
    evaluate_with_stats(rules, snapshots, &[])
}

pub(crate) fn evaluate_with_stats(
    rules: &[ThresholdRule],
    snapshots: &BTreeMap<String, RunningStats>,
    trend_stats: &[Statistic],
) -> RunReport {
    let thresholds: Vec<_> = rules
        .iter()
        .map(|rule| evaluate_rule(rule, snapshots.get(&rule.metric)))
        .collect();
    let passed = thresholds.iter().all(|r| r.passed);

    let mut extra: Vec<f64> = trend_stats
        .iter()
        .chain(rules.iter().map(|r| &r.statistic))
        .filter_map(|s| match s {
            Statistic::Percentile(q) => Some(*q),
            _ => None,
        })
        .collect();
    extra.sort_by(f64::total_cmp);
    extra.dedup();

    let metrics = snapshots
        .iter()
        .map(|(name, stats)| (name.clone(), stats.summary(&extra)))
        .collect();

    let check_prefix = format!("{CHECKS}{{");
    let checks = snapshots
        .iter()
        .filter_map(|(name, stats)| {
            let check = name.strip_prefix(&check_prefix)?.strip_suffix('}')?;
            Some(CheckSummary {
                name: check.to_string(),
                passes: stats.count() - stats.failures(),
                fails: stats.failures(),
            })
        })
        .collect();

    RunReport {
        run_id: Uuid::nil(),
        started_at: OffsetDateTime::UNIX_EPOCH,
        duration: Duration::ZERO,
        max_vus: 0,
        iterations: 0,
        metrics,
        checks,
        thresholds,
        aborted: None,
        passed,
    }
}

/// The first abort-on-fail rule that currently fails, if any.
///
/// Rules still inside their `delay_abort_eval` window are skipped, as are rules whose metric has
/// no samples yet.
pub(crate) fn check_abort(
    rules: &[ThresholdRule],
    collector: &MetricsCollector,
    elapsed: Duration,
) -> Option<RuleResult> {
    rules
        .iter()
        .filter(|rule| rule.abort_on_fail && elapsed >= rule.delay_abort_eval)
        .filter_map(|rule| {
            let stats = collector.snapshot(&rule.metric)?;
            Some(evaluate_rule(rule, Some(&stats)))
        })
        .find(|result| !result.passed)
}
