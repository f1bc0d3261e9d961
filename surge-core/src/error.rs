use std::path::PathBuf;
use thiserror::Error;

/// Every way a run configuration can be rejected. Raised before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid base URL `{url}`: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("No stages defined")]
    NoStages,

    #[error("Stage {index}: duration must be a non-negative number of seconds, got {value}")]
    StageDuration { index: usize, value: f64 },

    #[error("Stages last longer than the maximum of {max:?}")]
    TotalDuration { max: std::time::Duration },

    #[error("Stage {index}: target must be non-negative, got {value}")]
    StageTarget { index: usize, value: i64 },

    #[error("Threshold on `{metric}`: {reason}")]
    Threshold { metric: String, reason: String },

    #[error("Request {index}: {reason}")]
    Request { index: usize, reason: String },

    #[error("`{field}` {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
