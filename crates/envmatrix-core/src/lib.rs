//! Environment matrix runner core.
//!
//! Expands factor expressions like `py{311,312}{,-mindeps}` into concrete
//! test environments, orders them by their declared dependencies, executes
//! each in an isolated workspace with bounded concurrency, and aggregates
//! the outcomes into a single report with a deterministic exit code.

pub mod artifact;
pub mod config;
pub mod error;
pub mod exec;
pub mod factor;
pub mod graph;
pub mod plan;
pub mod report;
pub mod runner;
pub mod spec;
pub mod telemetry;

pub use artifact::{ArtifactCache, ArtifactOutcome};
pub use config::{ArtifactConfig, MatrixConfig, RunnerOptions, DEFAULT_CONFIG_FILE};
pub use error::{MatrixError, MatrixResult};
pub use factor::{expand_all, expand_factors, split_selection};
pub use plan::{plan, ExecutionPlan, PlanGroup, PlanOptions};
pub use report::{RunReport, Verdict, EXIT_ALL_SKIPPED, EXIT_FAILURE};
pub use runner::{EnvOutcome, MatrixRunner, RunResult};
pub use spec::{EnvSpec, Matrix};

/// Library version, from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
