use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The aggregate a threshold rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Statistic {
    Avg,
    Min,
    Max,
    Med,
    Count,
    /// Fraction of samples whose outcome is a failure.
    Rate,
    PassRate,
    /// Percentile in `(0, 100]`.
    Percentile(f64),
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let stat = match s {
            "avg" => Statistic::Avg,
            "min" => Statistic::Min,
            "max" => Statistic::Max,
            "med" => Statistic::Med,
            "count" => Statistic::Count,
            "rate" => Statistic::Rate,
            "pass_rate" => Statistic::PassRate,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| s.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown statistic `{s}`"))?;
                let q: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile `{s}`"))?;
                if !(q > 0. && q <= 100.) {
                    return Err(format!("percentile must be within (0, 100], got {q}"));
                }
                Statistic::Percentile(q)
            }
        };
        Ok(stat)
    }
}

impl TryFrom<String> for Statistic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Statistic> for String {
    fn from(value: Statistic) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Avg => write!(f, "avg"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
            Statistic::Med => write!(f, "med"),
            Statistic::Count => write!(f, "count"),
            Statistic::Rate => write!(f, "rate"),
            Statistic::PassRate => write!(f, "pass_rate"),
            Statistic::Percentile(q) => write!(f, "p({q})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparator {
    pub fn compare(self, actual: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => actual < bound,
            Comparator::Le => actual <= bound,
            Comparator::Gt => actual > bound,
            Comparator::Ge => actual >= bound,
            Comparator::Eq => (actual - bound).abs() < f64::EPSILON,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            "==" | "===" => Ok(Comparator::Eq),
            other => Err(format!("unknown comparator `{other}`")),
        }
    }
}

impl TryFrom<String> for Comparator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Comparator> for String {
    fn from(value: Comparator) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated pass/fail rule against one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub metric: String,
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub bound: f64,
    pub abort_on_fail: bool,
    /// Abort checks are skipped until the run has been going for this long.
    pub delay_abort_eval: Duration,
}

impl ThresholdRule {
    pub fn new(
        metric: &str,
        statistic: Statistic,
        comparator: Comparator,
        bound: f64,
    ) -> Result<Self, ConfigError> {
        if metric.trim().is_empty() {
            return Err(ConfigError::Threshold {
                metric: metric.to_string(),
                reason: "metric name is empty".to_string(),
            });
        }
        if !bound.is_finite() {
            return Err(ConfigError::Threshold {
                metric: metric.to_string(),
                reason: format!("bound must be a finite number, got {bound}"),
            });
        }

        Ok(Self {
            metric: metric.to_string(),
            statistic,
            comparator,
            bound,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    /// Parse a k6 style expression such as `p(95)<500` or `rate < 0.01`.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let err = |reason: String| ConfigError::Threshold {
            metric: metric.to_string(),
            reason,
        };

        let op_start = expression
            .find(['<', '>', '='])
            .ok_or_else(|| err(format!("no comparator in `{expression}`")))?;
        let rest = &expression[op_start..];
        let op_len = rest
            .find(|c: char| !matches!(c, '<' | '>' | '='))
            .unwrap_or(rest.len());

        let statistic = expression[..op_start].parse().map_err(err)?;
        let comparator = rest[..op_len].parse().map_err(err)?;
        let bound_str = rest[op_len..].trim();
        let bound = bound_str
            .parse::<f64>()
            .map_err(|_| err(format!("invalid bound `{bound_str}`")))?;

        Self::new(metric, statistic, comparator, bound)
    }

    pub fn abort_on_fail(mut self, abort: bool) -> Self {
        self.abort_on_fail = abort;
        self
    }

    pub fn delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = delay;
        self
    }

    pub fn holds(&self, actual: f64) -> bool {
        self.comparator.compare(actual, self.bound)
    }

    pub fn expression(&self) -> String {
        format!("{}{}{}", self.statistic, self.comparator, self.bound)
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_k6_expressions() {
        let rule = ThresholdRule::parse("http_req_duration", "p(95)<500").unwrap();
        assert_eq!(rule.statistic, Statistic::Percentile(95.));
        assert_eq!(rule.comparator, Comparator::Lt);
        assert_eq!(rule.bound, 500.);

        let rule = ThresholdRule::parse("http_req_failed", " rate <= 0.01 ").unwrap();
        assert_eq!(rule.statistic, Statistic::Rate);
        assert_eq!(rule.comparator, Comparator::Le);
        assert_eq!(rule.bound, 0.01);

        let rule = ThresholdRule::parse("checks", "pass_rate>=0.99").unwrap();
        assert_eq!(rule.statistic, Statistic::PassRate);
        assert_eq!(rule.comparator, Comparator::Ge);

        let rule = ThresholdRule::parse("iteration_duration", "p99.9 == 3").unwrap();
        assert_eq!(rule.statistic, Statistic::Percentile(99.9));
        assert_eq!(rule.comparator, Comparator::Eq);
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(ThresholdRule::parse("m", "p(95)500").is_err());
        assert!(ThresholdRule::parse("m", "p(0)<5").is_err());
        assert!(ThresholdRule::parse("m", "p(101)<5").is_err());
        assert!(ThresholdRule::parse("m", "mean<5").is_err());
        assert!(ThresholdRule::parse("m", "avg=<5").is_err());
        assert!(ThresholdRule::parse("m", "avg<fast").is_err());
        assert!(ThresholdRule::parse("", "avg<5").is_err());
    }

    #[test]
    fn comparators() {
        assert!(Comparator::Lt.compare(0.009, 0.01));
        assert!(!Comparator::Lt.compare(0.01, 0.01));
        assert!(Comparator::Le.compare(0.01, 0.01));
        assert!(Comparator::Gt.compare(2., 1.));
        assert!(Comparator::Ge.compare(1., 1.));
        assert!(Comparator::Eq.compare(0.1 + 0.2, 0.3));
    }

    #[test]
    fn expression_round_trips_through_display() {
        let rule = ThresholdRule::parse("http_req_duration", "p(99)>=250.5").unwrap();
        let reparsed = ThresholdRule::parse("http_req_duration", &rule.expression()).unwrap();
        assert_eq!(rule, reparsed);
    }
}
