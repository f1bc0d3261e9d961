//! Thread-safe aggregation of samples into named metrics.
//!
//! Each metric keeps count, failures, sum, min and max exactly. Latencies are kept verbatim for
//! exact percentiles until the configured limit is reached, after which they are folded into a
//! t-digest.
use arc_swap::ArcSwap;
use pdatastructs::tdigest::{TDigest, K1};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use surge_core::{MetricSummary, Sample, Statistic};

#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

const TDIGEST_BACKLOG_SIZE: usize = 100;

#[derive(Debug, Clone)]
enum Quantiles {
    Exact { values: Vec<f64>, sorted: bool },
    Sketch(TDigest<K1>),
}

/// Running aggregates of a single metric.
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: u64,
    failures: u64,
    sum: Duration,
    min: Duration,
    max: Duration,
    exact_limit: usize,
    quantiles: Quantiles,
}

impl RunningStats {
    pub fn new(exact_limit: usize) -> Self {
        Self {
            count: 0,
            failures: 0,
            sum: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            exact_limit,
            quantiles: Quantiles::Exact {
                values: vec![],
                sorted: true,
            },
        }
    }

    pub fn push(&mut self, sample: &Sample) {
        self.count += 1;
        if !sample.outcome.is_success() {
            self.failures += 1;
        }
        self.sum = self.sum.saturating_add(sample.latency);
        self.min = self.min.min(sample.latency);
        self.max = self.max.max(sample.latency);

        let ms = millis(sample.latency);
        if let Quantiles::Exact { values, .. } = &self.quantiles {
            if values.len() >= self.exact_limit {
                trace!("Switching to approximate percentiles after {} samples", values.len());
                let mut digest = TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE);
                for v in values {
                    digest.insert(*v);
                }
                self.quantiles = Quantiles::Sketch(digest);
            }
        }

        match &mut self.quantiles {
            Quantiles::Exact { values, sorted } => {
                *sorted = false;
                values.push(ms);
            }
            Quantiles::Sketch(digest) => digest.insert(ms),
        }
    }

    /// Sort the exact latency list so percentile lookups don't have to.
    pub(crate) fn finalize(&mut self) {
        if let Quantiles::Exact { values, sorted } = &mut self.quantiles {
            if !*sorted {
                values.sort_by(f64::total_cmp);
                *sorted = true;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.quantiles, Quantiles::Exact { .. })
    }

    /// Fraction of samples which failed.
    pub fn rate(&self) -> f64 {
        if self.count == 0 {
            return 0.;
        }
        self.failures as f64 / self.count as f64
    }

    pub fn pass_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.;
        }
        1. - self.rate()
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            return 0.;
        }
        millis(self.sum) / self.count as f64
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            return 0.;
        }
        millis(self.min)
    }

    pub fn max(&self) -> f64 {
        millis(self.max)
    }

    /// Latency at percentile `q` (0 to 100) in milliseconds, linearly interpolated between ranks.
    pub fn percentile(&self, q: f64) -> f64 {
        match &self.quantiles {
            Quantiles::Exact { values, sorted: true } => interpolate(values, q),
            Quantiles::Exact { values, sorted: false } => {
                let mut values = values.clone();
                values.sort_by(f64::total_cmp);
                interpolate(&values, q)
            }
            Quantiles::Sketch(digest) => {
                let value = digest.quantile(q / 100.);
                // NOTE: Empty or degenerate digests report NaN
                if value.is_nan() {
                    0.
                } else {
                    value
                }
            }
        }
    }

    pub fn stat(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Avg => self.avg(),
            Statistic::Min => self.min(),
            Statistic::Max => self.max(),
            Statistic::Med => self.percentile(50.),
            Statistic::Count => self.count as f64,
            Statistic::Rate => self.rate(),
            Statistic::PassRate => self.pass_rate(),
            Statistic::Percentile(q) => self.percentile(q),
        }
    }

    /// Summary for the report. `extra` lists further percentiles beyond med, p90, p95 and p99.
    pub fn summary(&self, extra: &[f64]) -> MetricSummary {
        let percentiles = extra
            .iter()
            .filter(|q| ![50., 90., 95., 99.].contains(*q))
            .map(|q| (Statistic::Percentile(*q).to_string(), self.percentile(*q)))
            .collect();

        MetricSummary {
            count: self.count,
            failures: self.failures,
            rate: self.rate(),
            avg: self.avg(),
            min: self.min(),
            med: self.percentile(50.),
            max: self.max(),
            p90: self.percentile(90.),
            p95: self.percentile(95.),
            p99: self.percentile(99.),
            percentiles,
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.
}

fn interpolate(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.,
        1 => sorted[0],
        n => {
            let rank = (q / 100.).clamp(0., 1.) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

type Registry = HashMap<String, Arc<Mutex<RunningStats>>>;

/// Shared sink for every virtual user's samples. Cheap to clone.
#[derive(Clone)]
pub struct MetricsCollector {
    metrics: Arc<ArcSwap<Registry>>,
    exact_limit: usize,
}

impl MetricsCollector {
    pub fn new(exact_limit: usize) -> Self {
        Self {
            metrics: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            exact_limit,
        }
    }

    pub fn record(&self, name: &str, sample: &Sample) {
        let stats = self.entry(name);
        stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);

        #[cfg(feature = "metrics")]
        {
            let exported = exported_name(name);
            metrics::histogram!(format!("surge_{exported}")).record(sample.latency.as_secs_f64());
            if !sample.outcome.is_success() {
                metrics::counter!(format!("surge_{exported}_failures")).increment(1);
            }
        }
    }

    fn entry(&self, name: &str) -> Arc<Mutex<RunningStats>> {
        loop {
            if let Some(stats) = self.metrics.load().get(name) {
                return stats.clone();
            }

            self.metrics.rcu(|current| {
                let mut next = Registry::clone(current);
                next.entry(name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(RunningStats::new(self.exact_limit))));
                next
            });
        }
    }

    /// A consistent copy of one metric's aggregates, or `None` if nothing was recorded under it.
    pub fn snapshot(&self, name: &str) -> Option<RunningStats> {
        let stats = self.metrics.load().get(name).cloned()?;
        let mut snapshot = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
        snapshot.finalize();
        Some(snapshot)
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, RunningStats> {
        let metrics = self.metrics.load_full();
        metrics
            .iter()
            .map(|(name, stats)| {
                let mut snapshot = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
                snapshot.finalize();
                (name.clone(), snapshot)
            })
            .collect()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.load().keys().cloned().collect()
    }
}

#[cfg(feature = "metrics")]
fn exported_name(name: &str) -> String {
    name.trim_end_matches('}')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("metrics", &self.metrics.load().len())
            .field("exact_limit", &self.exact_limit)
            .finish()
    }
}
