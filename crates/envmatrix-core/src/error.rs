//! Error types for matrix expansion, planning, and execution.

use thiserror::Error;

/// Errors produced by the environment matrix runner.
///
/// Configuration-level variants (`InvalidFactorSyntax`, `DependencyCycle`,
/// `EnvNotFound`, `Config`) are fatal to the whole invocation and are raised
/// before any environment executes. Execution-level variants are isolated to
/// the owning environment.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// A factor expression could not be expanded.
    #[error("invalid factor syntax in '{expr}': {detail}")]
    InvalidFactorSyntax { expr: String, detail: String },

    /// The `depends` relation contains a cycle among the selected environments.
    #[error("dependency cycle detected involving environments: {envs:?}")]
    DependencyCycle { envs: Vec<String> },

    /// A `depends` entry or selection referenced an environment that is not
    /// in the expanded matrix.
    #[error("environment not found in matrix: {env} (referenced by {referenced_by})")]
    EnvNotFound { env: String, referenced_by: String },

    /// An environment's pinned interpreter is not available on this host.
    #[error("interpreter '{interpreter}' not available for environment {env}")]
    MissingInterpreter { env: String, interpreter: String },

    /// A command exited non-zero; aborts the owning environment only.
    #[error("command '{command}' in environment {env} exited with code {exit_code}")]
    CommandFailure {
        env: String,
        command: String,
        exit_code: i32,
    },

    /// Building a shared artifact failed; fails every environment waiting
    /// on that artifact, not just the builder.
    #[error("shared artifact '{artifact}' failed to build: {reason}")]
    ArtifactBuildFailure { artifact: String, reason: String },

    /// Malformed or inconsistent configuration file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or process I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
