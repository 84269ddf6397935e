//! Declarative configuration file (`envmatrix.toml`) loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MatrixError, MatrixResult};
use crate::factor::expand_factors;

/// Supported configuration schema version.
pub const CONFIG_VERSION: &str = "1";

/// Default configuration file name looked up in the project root.
pub const DEFAULT_CONFIG_FILE: &str = "envmatrix.toml";

/// The entire matrix definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Schema version of this file (must equal [`CONFIG_VERSION`]).
    pub version: String,

    /// Runner-wide options.
    #[serde(default)]
    pub options: RunnerOptions,

    /// Shared build artifacts, keyed by artifact name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactConfig>,

    /// Environment definitions. Keys may use factor syntax and expand to
    /// multiple concrete environments.
    #[serde(default)]
    pub envs: BTreeMap<String, RawEnvConfig>,
}

/// Runner-wide options. All flags are explicit configuration fields; the
/// runner reads nothing ambient beyond the declared environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Default selection when the caller does not name environments.
    /// Entries may use factor syntax; order defines matrix order.
    pub envlist: Vec<String>,

    /// Concurrent environments within one plan group. 1 = sequential.
    pub workers: usize,

    /// Stop launching new environments after the first failure.
    pub fail_fast: bool,

    /// Record environments with an unavailable interpreter as skipped
    /// instead of failed.
    pub skip_missing_interpreters: bool,

    /// Drop (with a warning) `depends` edges pointing at environments that
    /// were not selected, instead of pulling them into the plan.
    pub skip_unlisted_deps: bool,

    /// Per-command timeout in seconds. 0 disables the timeout.
    pub command_timeout_secs: u64,

    /// Directory (relative to the project root) holding per-environment
    /// workspaces.
    pub workspace_root: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            envlist: Vec::new(),
            workers: 1,
            fail_fast: false,
            skip_missing_interpreters: false,
            skip_unlisted_deps: false,
            command_timeout_secs: 0,
            workspace_root: PathBuf::from(".envmatrix"),
        }
    }
}

/// A shared build artifact produced at most once per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Build command (first element is the executable).
    pub command: Vec<String>,

    /// Working directory override for the build command.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// An environment definition as written in the config file, before factor
/// expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEnvConfig {
    /// Human-readable description, shown by `envmatrix list`.
    pub description: Option<String>,

    /// Interpreter pin; the environment is skipped or failed when this
    /// program cannot be found.
    pub interpreter: Option<String>,

    /// Dependency sets keyed by selector. The `default` set applies unless
    /// another selector matches one of the environment's factors.
    pub deps: BTreeMap<String, Vec<String>>,

    /// Setup commands, run before `commands`; pass-through arguments are
    /// not appended to these.
    pub commands_pre: Vec<Vec<String>>,

    /// Main commands.
    pub commands: Vec<Vec<String>>,

    /// Prerequisite environments (factor syntax allowed).
    pub depends: Vec<String>,

    /// Extra environment variables for every command in this environment.
    pub env: BTreeMap<String, String>,

    /// Working directory override (relative to the project root).
    pub workdir: Option<PathBuf>,

    /// Skip installing the package under test into this environment.
    pub skip_install: bool,

    /// Shared artifact this environment consumes, by key.
    pub artifact: Option<String>,
}

impl MatrixConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> MatrixResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(data: &str) -> MatrixResult<Self> {
        let config: MatrixConfig = toml::from_str(data)
            .map_err(|e| MatrixError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> MatrixResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(MatrixError::Config(format!(
                "config version {} is not supported (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        for (key, env) in &self.envs {
            for name in expand_factors(key)? {
                if !is_valid_env_name(&name) {
                    return Err(MatrixError::Config(format!(
                        "invalid environment name: {name}"
                    )));
                }
            }
            if let Some(artifact) = &env.artifact {
                if !self.artifacts.contains_key(artifact) {
                    return Err(MatrixError::Config(format!(
                        "environment '{key}' references undefined artifact '{artifact}'"
                    )));
                }
            }
            for command in env.commands_pre.iter().chain(env.commands.iter()) {
                if command.is_empty() {
                    return Err(MatrixError::Config(format!(
                        "environment '{key}' declares an empty command"
                    )));
                }
            }
        }

        for (key, artifact) in &self.artifacts {
            if artifact.command.is_empty() {
                return Err(MatrixError::Config(format!(
                    "artifact '{key}' declares an empty build command"
                )));
            }
        }

        Ok(())
    }
}

fn is_valid_env_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
