//! Staged HTTP load generation.
//!
//! A run ramps a population of virtual users through a piecewise-linear profile of stages. Each
//! user repeatedly walks a request plan, every request cycle is recorded into named metrics, and
//! at the end threshold rules decide whether the run passed.
//!
//! ```no_run
//! use std::time::Duration;
//! use surge::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new(
//!     "http://localhost:8080/api/info",
//!     &[
//!         Stage::new(Duration::from_secs(30), 10),
//!         Stage::new(Duration::from_secs(30), 0),
//!     ],
//! )
//! .threshold("http_req_failed", "rate<0.01", false)
//! .threshold("http_req_duration", "p(95)<500", false);
//!
//! let report = surge::run(&config, ReqwestClient::new()?).await?;
//! assert!(report.passed);
//! # Ok(())
//! # }
//! ```
pub mod http;

mod checks;
mod collector;
mod controller;
mod executor;
mod plan;
mod scheduler;
mod template;
mod thresholds;
mod timed;
mod timer;

pub use checks::Check;
pub use collector::{MetricsCollector, RunningStats};
pub use controller::{run, RunController};
pub use plan::{PlannedRequest, RequestPlan};
pub use scheduler::StageProfile;
pub use template::{Template, TemplateContext};
pub use thresholds::{evaluate, evaluate_rule};

pub use surge_core::*;

pub mod prelude {
    pub use crate::checks::Check;
    pub use crate::controller::{run, RunController};
    pub use crate::http::{HttpClient, ReqwestClient};
    pub use crate::plan::{PlannedRequest, RequestPlan};
    pub use surge_core::{
        AbortReason, ConfigError, Method, RunConfig, RunReport, Stage, ThresholdRule,
    };
}
