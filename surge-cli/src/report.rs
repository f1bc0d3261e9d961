//! Human-readable and JSON renderings of a run report.
use anyhow::Context;
use std::fmt::Write;
use std::path::Path;
use surge_core::{MetricSummary, RunReport, Statistic, CHECKS, HTTP_REQ_FAILED};

const NAME_WIDTH: usize = 32;

pub fn export(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))
}

/// Render the end-of-run summary. `trend_stats` selects the columns shown for latency metrics.
pub fn render(report: &RunReport, trend_stats: &[Statistic]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report, trend_stats);
    out
}

fn write_report(out: &mut String, report: &RunReport, trend_stats: &[Statistic]) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "  run {}", report.run_id)?;
    writeln!(
        out,
        "  started {}, ran for {}",
        report
            .started_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        format_secs(report.duration.as_secs_f64()),
    )?;
    writeln!(
        out,
        "  peak users {}, iterations {}",
        report.max_vus, report.iterations
    )?;
    writeln!(out)?;

    if !report.checks.is_empty() {
        for check in &report.checks {
            let mark = if check.fails == 0 { '✓' } else { '✗' };
            writeln!(
                out,
                "  {mark} {}: ✓ {} ✗ {}",
                check.name, check.passes, check.fails
            )?;
        }
        writeln!(out)?;
    }

    for (name, summary) in &report.metrics {
        if name.starts_with(&format!("{CHECKS}{{")) {
            continue;
        }
        let dots = ".".repeat(NAME_WIDTH.saturating_sub(name.len()));
        if is_rate_metric(name) {
            writeln!(out, "  {name}{dots}: {}", rate_line(name, summary))?;
        } else {
            writeln!(out, "  {name}{dots}: {}", trend_line(summary, trend_stats))?;
        }
    }

    if !report.thresholds.is_empty() {
        writeln!(out)?;
        writeln!(out, "  thresholds")?;
        for rule in &report.thresholds {
            let mark = if rule.passed { '✓' } else { '✗' };
            writeln!(out, "    {mark} {rule}")?;
        }
    }

    writeln!(out)?;
    if let Some(reason) = &report.aborted {
        writeln!(out, "  aborted: {reason}")?;
    }
    writeln!(
        out,
        "  result: {}",
        if report.passed { "PASSED" } else { "FAILED" }
    )
}

fn is_rate_metric(name: &str) -> bool {
    name == CHECKS || name.starts_with(HTTP_REQ_FAILED)
}

/// `http_req_failed` counts failures as "✓"; checks count passes.
fn rate_line(name: &str, summary: &MetricSummary) -> String {
    let passes = summary.count - summary.failures;
    if name == CHECKS {
        format!(
            "{:.2}% ✓ {passes} ✗ {}",
            (1. - summary.rate) * 100.,
            summary.failures
        )
    } else {
        format!(
            "{:.2}% ✓ {} ✗ {passes}",
            summary.rate * 100.,
            summary.failures
        )
    }
}

fn trend_line(summary: &MetricSummary, trend_stats: &[Statistic]) -> String {
    trend_stats
        .iter()
        .map(|stat| {
            let value = match (stat, summary.get(*stat)) {
                (_, None) => "-".to_string(),
                (Statistic::Count, Some(v)) => format!("{v}"),
                (Statistic::Rate | Statistic::PassRate, Some(v)) => format!("{:.2}%", v * 100.),
                (_, Some(v)) => format_ms(v),
            };
            format!("{stat}={value}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_ms(ms: f64) -> String {
    if ms >= 1_000. {
        format_secs(ms / 1_000.)
    } else {
        format!("{ms:.2}ms")
    }
}

fn format_secs(secs: f64) -> String {
    if secs >= 60. {
        format!("{}m{:.1}s", (secs / 60.).floor(), secs % 60.)
    } else {
        format!("{secs:.2}s")
    }
}
