//! Run configuration: the JSON file schema and its validation.
//!
//! A [`RunConfig`] mirrors the file as written; [`RunConfig::validate`] turns it into a
//! [`ValidatedConfig`] whose invariants the engine relies on (non-negative stages, parsed
//! thresholds, absolute base URL, resolved request plan).
use crate::{
    ConfigError, Stage, Statistic, ThresholdRule, CHECKS, DEFAULT_EXACT_PERCENTILE_LIMIT,
    DEFAULT_GRACEFUL_STOP, DEFAULT_PACE, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCHEDULER_TICK,
    DEFAULT_SUMMARY_TREND_STATS, DEFAULT_THRESHOLD_CHECK_INTERVAL, HTTP_REQ_FAILED,
    MAX_DURATION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub base_url: String,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,
    #[serde(default)]
    pub requests: Vec<RequestConfig>,
    #[serde(default, alias = "requestTimeoutSeconds")]
    pub request_timeout: Option<ConfigDuration>,
    #[serde(default, alias = "paceSeconds")]
    pub pace: Option<ConfigDuration>,
    #[serde(default, alias = "gracefulStopSeconds")]
    pub graceful_stop: Option<ConfigDuration>,
    #[serde(default)]
    pub scheduler_tick: Option<ConfigDuration>,
    #[serde(default)]
    pub threshold_check_interval: Option<ConfigDuration>,
    #[serde(default)]
    pub max_rps: Option<u32>,
    #[serde(default)]
    pub exact_percentile_limit: Option<usize>,
    #[serde(default)]
    pub summary_trend_stats: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    #[serde(alias = "durationSeconds")]
    pub duration: ConfigDuration,
    pub target: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub metric: String,
    /// k6 style expression, e.g. `p(95)<500`. Mutually exclusive with the structured fields.
    #[serde(default)]
    pub threshold: Option<String>,
    #[serde(default, alias = "statistic")]
    pub stat: Option<String>,
    #[serde(default)]
    pub comparator: Option<String>,
    #[serde(default)]
    pub bound: Option<f64>,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub delay_abort_eval: Option<ConfigDuration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Strings are sent verbatim, any other JSON value is serialized and sent as JSON.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    #[serde(default)]
    pub trend: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    pub name: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub header_present: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
    #[serde(alias = "head")]
    Head,
    #[serde(alias = "options")]
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A duration given either as a number of seconds or as a humantime string (`"2m"`).
///
/// Kept as raw seconds so that negative values survive parsing and are reported by validation
/// with the offending field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "f64")]
pub struct ConfigDuration(pub f64);

impl From<ConfigDuration> for f64 {
    fn from(value: ConfigDuration) -> Self {
        value.0
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self(value.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = ConfigDuration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number of seconds or a duration string such as \"30s\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ConfigDuration(v as f64))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ConfigDuration(v as f64))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ConfigDuration(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v.trim())
                    .map(|d| ConfigDuration(d.as_secs_f64()))
                    .map_err(|err| E::custom(format!("invalid duration `{v}`: {err}")))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Configuration after validation. Everything the engine needs, nothing left to check.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub base_url: Url,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdRule>,
    pub requests: Vec<RequestSpec>,
    pub request_timeout: Duration,
    pub pace: Duration,
    pub graceful_stop: Duration,
    pub scheduler_tick: Duration,
    pub threshold_check_interval: Duration,
    pub max_rps: Option<NonZeroU32>,
    pub exact_percentile_limit: usize,
    pub summary_trend_stats: Vec<Statistic>,
}

/// One request of the per-iteration plan. `url`, header values and `body` may still carry
/// per-iteration `{{...}}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub name: Option<String>,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub checks: Vec<CheckSpec>,
    pub trend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub name: String,
    pub status: Option<u16>,
    pub body_contains: Option<String>,
    pub header_present: Option<String>,
}

impl CheckSpec {
    pub fn status(name: &str, status: u16) -> Self {
        Self {
            name: name.to_string(),
            status: Some(status),
            body_contains: None,
            header_present: None,
        }
    }
}

impl RunConfig {
    /// A minimal config: one GET of `base_url` per iteration over the given stages.
    pub fn new(base_url: &str, stages: &[Stage]) -> Self {
        Self {
            base_url: base_url.to_string(),
            stages: stages
                .iter()
                .map(|s| StageConfig {
                    duration: s.duration.into(),
                    target: s.target as i64,
                })
                .collect(),
            thresholds: vec![],
            requests: vec![],
            request_timeout: None,
            pace: None,
            graceful_stop: None,
            scheduler_tick: None,
            threshold_check_interval: None,
            max_rps: None,
            exact_percentile_limit: None,
            summary_trend_stats: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn threshold(mut self, metric: &str, expression: &str, abort_on_fail: bool) -> Self {
        self.thresholds.push(ThresholdConfig {
            metric: metric.to_string(),
            threshold: Some(expression.to_string()),
            abort_on_fail,
            ..Default::default()
        });
        self
    }

    pub fn request(mut self, request: RequestConfig) -> Self {
        self.requests.push(request);
        self
    }

    /// Validate, expanding `${VAR}` placeholders from the process environment.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        self.validate_with_env(|name| std::env::var(name).ok())
    }

    pub fn validate_with_env<E>(&self, env: E) -> Result<ValidatedConfig, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let base_url = parse_base_url(&self.base_url, &env)?;
        let stages = validate_stages(&self.stages)?;

        let thresholds = self
            .thresholds
            .iter()
            .map(ThresholdConfig::validate)
            .collect::<Result<Vec<_>, _>>()?;

        let requests = if self.requests.is_empty() {
            vec![RequestSpec {
                name: None,
                method: Method::Get,
                url: base_url.to_string(),
                headers: vec![],
                body: None,
                checks: vec![CheckSpec::status("status is 200", 200)],
                trend: None,
            }]
        } else {
            self.requests
                .iter()
                .enumerate()
                .map(|(index, request)| request.validate(index, &base_url, &env))
                .collect::<Result<Vec<_>, _>>()?
        };

        let max_rps = match self.max_rps {
            Some(rps) => Some(NonZeroU32::new(rps).ok_or(ConfigError::InvalidValue {
                field: "maxRps",
                reason: "must be greater than zero".to_string(),
            })?),
            None => None,
        };

        let exact_percentile_limit = self
            .exact_percentile_limit
            .unwrap_or(DEFAULT_EXACT_PERCENTILE_LIMIT);
        if exact_percentile_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "exactPercentileLimit",
                reason: "must be at least 1".to_string(),
            });
        }

        let summary_trend_stats = match &self.summary_trend_stats {
            Some(stats) => stats
                .iter()
                .map(|s| {
                    s.parse::<Statistic>()
                        .map_err(|reason| ConfigError::InvalidValue {
                            field: "summaryTrendStats",
                            reason,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_SUMMARY_TREND_STATS
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
        };

        Ok(ValidatedConfig {
            base_url,
            stages,
            thresholds,
            requests,
            request_timeout: positive("requestTimeout", self.request_timeout, DEFAULT_REQUEST_TIMEOUT)?,
            pace: non_negative("pace", self.pace, DEFAULT_PACE)?,
            graceful_stop: non_negative("gracefulStop", self.graceful_stop, DEFAULT_GRACEFUL_STOP)?,
            scheduler_tick: positive("schedulerTick", self.scheduler_tick, DEFAULT_SCHEDULER_TICK)?,
            threshold_check_interval: positive(
                "thresholdCheckInterval",
                self.threshold_check_interval,
                DEFAULT_THRESHOLD_CHECK_INTERVAL,
            )?,
            max_rps,
            exact_percentile_limit,
            summary_trend_stats,
        })
    }
}

impl ThresholdConfig {
    fn validate(&self) -> Result<ThresholdRule, ConfigError> {
        let err = |reason: &str| ConfigError::Threshold {
            metric: self.metric.clone(),
            reason: reason.to_string(),
        };

        let rule = match (&self.threshold, &self.stat, &self.comparator, self.bound) {
            (Some(expression), None, None, None) => ThresholdRule::parse(&self.metric, expression)?,
            (Some(_), _, _, _) => {
                return Err(err("use either `threshold` or `stat`/`comparator`/`bound`, not both"))
            }
            (None, stat, Some(comparator), Some(bound)) => {
                let statistic = match stat {
                    Some(stat) => stat.parse().map_err(|reason: String| err(&reason))?,
                    None => default_statistic(&self.metric),
                };
                let comparator = comparator.parse().map_err(|reason: String| err(&reason))?;
                ThresholdRule::new(&self.metric, statistic, comparator, bound)?
            }
            (None, _, _, _) => {
                return Err(err("requires `threshold` or both `comparator` and `bound`"))
            }
        };

        let delay = match self.delay_abort_eval {
            Some(delay) => to_duration("delayAbortEval", delay)?,
            None => Duration::ZERO,
        };

        Ok(rule.abort_on_fail(self.abort_on_fail).delay_abort_eval(delay))
    }
}

/// Statistic a structured threshold without `stat` applies to: the failure rate for rate metrics,
/// the mean otherwise.
pub fn default_statistic(metric: &str) -> Statistic {
    let base = metric.split_once('{').map_or(metric, |(base, _)| base);
    if base == HTTP_REQ_FAILED || base == CHECKS {
        Statistic::Rate
    } else {
        Statistic::Avg
    }
}

impl RequestConfig {
    fn validate<E>(&self, index: usize, base_url: &Url, env: &E) -> Result<RequestSpec, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let err = |reason: String| ConfigError::Request { index, reason };

        let path = expand_env(&self.path, env).map_err(err)?;
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else if path.is_empty() {
            base_url.to_string()
        } else {
            format!(
                "{}/{}",
                base_url.as_str().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        let mut headers = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.trim().is_empty() {
                    return Err(err("header name is empty".to_string()));
                }
                Ok((k.clone(), expand_env(v, env).map_err(err)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = match &self.body {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(body)) => Some(expand_env(body, env).map_err(err)?),
            Some(value) => {
                if !headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(expand_env(&value.to_string(), env).map_err(err)?)
            }
        };

        let checks = self
            .checks
            .iter()
            .map(|check| check.validate().map_err(err))
            .collect::<Result<Vec<_>, _>>()?;

        if matches!(&self.trend, Some(trend) if trend.trim().is_empty()) {
            return Err(err("trend metric name is empty".to_string()));
        }

        Ok(RequestSpec {
            name: self.name.clone(),
            method: self.method,
            url,
            headers,
            body,
            checks,
            trend: self.trend.clone(),
        })
    }
}

impl CheckConfig {
    fn validate(&self) -> Result<CheckSpec, String> {
        if self.name.trim().is_empty() {
            return Err("check name is empty".to_string());
        }
        if let Some(status) = self.status {
            if !(100..=599).contains(&status) {
                return Err(format!("check `{}`: invalid status code {status}", self.name));
            }
        }
        if self.status.is_none() && self.body_contains.is_none() && self.header_present.is_none() {
            return Err(format!("check `{}` has no condition", self.name));
        }

        Ok(CheckSpec {
            name: self.name.clone(),
            status: self.status,
            body_contains: self.body_contains.clone(),
            header_present: self.header_present.clone(),
        })
    }
}

fn parse_base_url<E>(raw: &str, env: &E) -> Result<Url, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let err = |reason: String| ConfigError::BaseUrl {
        url: raw.to_string(),
        reason,
    };

    let expanded = expand_env(raw, env).map_err(err)?;
    let url = Url::parse(expanded.trim()).map_err(|e| err(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(err(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(err("missing host".to_string()));
    }
    Ok(url)
}

fn validate_stages(stages: &[StageConfig]) -> Result<Vec<Stage>, ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::NoStages);
    }

    let mut total = Duration::ZERO;
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let duration = Duration::try_from_secs_f64(stage.duration.0).map_err(|_| {
                ConfigError::StageDuration {
                    index,
                    value: stage.duration.0,
                }
            })?;
            total = total
                .checked_add(duration)
                .filter(|total| *total <= MAX_DURATION)
                .ok_or(ConfigError::TotalDuration { max: MAX_DURATION })?;
            let target = usize::try_from(stage.target).map_err(|_| ConfigError::StageTarget {
                index,
                value: stage.target,
            })?;
            Ok(Stage::new(duration, target))
        })
        .collect()
}

fn to_duration(field: &'static str, value: ConfigDuration) -> Result<Duration, ConfigError> {
    let duration = Duration::try_from_secs_f64(value.0).map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("must be a non-negative number of seconds, got {}", value.0),
    })?;
    if duration > MAX_DURATION {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!(
                "must not exceed {}, got {}",
                humantime::format_duration(MAX_DURATION),
                humantime::format_duration(duration)
            ),
        });
    }
    Ok(duration)
}

fn non_negative(
    field: &'static str,
    value: Option<ConfigDuration>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), |v| to_duration(field, v))
}

fn positive(
    field: &'static str,
    value: Option<ConfigDuration>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let duration = non_negative(field, value, default)?;
    if duration.is_zero() {
        Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        })
    } else {
        Ok(duration)
    }
}

/// Expand `${NAME}` and `${NAME:-default}` placeholders. As in the shell, the default also
/// replaces a variable set to the empty string.
pub fn expand_env<E>(input: &str, env: &E) -> Result<String, String>
where
    E: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in `{input}`"))?;
        let expr = &after[..end];

        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        match (env(name), default) {
            (Some(value), Some(default)) if value.is_empty() => out.push_str(default),
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => return Err(format!("environment variable `{name}` is not set")),
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
