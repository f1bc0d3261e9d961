use std::fmt;
use std::time::{Duration, SystemTime};

/// A segment of the load profile: ramp linearly to `target` concurrent users over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn from_bool(ok: bool, reason: impl FnOnce() -> String) -> Self {
        if ok {
            Outcome::Success
        } else {
            Outcome::Failure(reason())
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// A single measurement produced by a virtual user. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: SystemTime,
    pub latency: Duration,
    pub outcome: Outcome,
}

impl Sample {
    pub fn new(latency: Duration, outcome: Outcome) -> Self {
        Self {
            timestamp: SystemTime::now(),
            latency,
            outcome,
        }
    }

    pub fn success(latency: Duration) -> Self {
        Self::new(latency, Outcome::Success)
    }

    pub fn failure(latency: Duration, reason: impl Into<String>) -> Self {
        Self::new(latency, Outcome::failure(reason))
    }
}
