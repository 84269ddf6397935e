//! Concrete environment specifications and the expanded matrix.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{MatrixConfig, RawEnvConfig};
use crate::error::{MatrixError, MatrixResult};
use crate::factor::{expand_all, expand_factors, factors_of};

/// A single concrete environment after factor expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Concrete name, e.g. `py311-mindeps`.
    pub name: String,

    /// Dash-separated factors of the name, used for dependency-set selection.
    pub factors: Vec<String>,

    /// Human-readable description.
    pub description: Option<String>,

    /// Interpreter pin, if any.
    pub interpreter: Option<String>,

    /// Dependency sets keyed by selector.
    pub deps: BTreeMap<String, Vec<String>>,

    /// Setup commands run before the main commands.
    pub commands_pre: Vec<Vec<String>>,

    /// Main commands; pass-through arguments are appended to these.
    pub commands: Vec<Vec<String>>,

    /// Prerequisite environments, expanded to concrete names.
    pub depends: Vec<String>,

    /// Declared environment variables.
    pub env_vars: BTreeMap<String, String>,

    /// Working directory override.
    pub workdir: Option<PathBuf>,

    /// Skip package installation for this environment.
    pub skip_install: bool,

    /// Shared artifact key consumed by this environment.
    pub artifact: Option<String>,
}

impl EnvSpec {
    /// Resolve the dependency list for this environment.
    ///
    /// A selector other than `default` applies when it equals one of the
    /// environment's factors; among several matches the lexicographically
    /// first wins (selectors are stored ordered). Falls back to `default`,
    /// then to an empty list.
    pub fn resolved_deps(&self) -> &[String] {
        for (selector, deps) in &self.deps {
            if selector != "default" && self.factors.iter().any(|f| f == selector) {
                return deps;
            }
        }
        self.deps.get("default").map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The ordered, expanded set of environments for one invocation.
///
/// Order is deterministic: environments named by `options.envlist` come
/// first in envlist order, then any remaining definitions sorted by name.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    envs: Vec<EnvSpec>,
    index: HashMap<String, usize>,
}

impl Matrix {
    /// Expand a validated [`MatrixConfig`] into a concrete matrix.
    ///
    /// Fails with [`MatrixError::Config`] on duplicate concrete names and
    /// with [`MatrixError::EnvNotFound`] when a `depends` entry references
    /// a name no definition expands to.
    pub fn from_config(config: &MatrixConfig) -> MatrixResult<Self> {
        // Expand every definition key into (name, raw config) pairs.
        let mut defined: HashMap<String, (&String, &RawEnvConfig)> = HashMap::new();
        let mut defined_order: Vec<String> = Vec::new();
        for (key, raw) in &config.envs {
            for name in expand_factors(key)? {
                if defined.insert(name.clone(), (key, raw)).is_some() {
                    return Err(MatrixError::Config(format!(
                        "environment '{name}' is defined more than once"
                    )));
                }
                defined_order.push(name);
            }
        }
        defined_order.sort_unstable();

        // envlist order first, then the remaining definitions by name.
        let mut ordered: Vec<String> = Vec::new();
        for name in expand_all(&config.options.envlist)? {
            if !defined.contains_key(&name) {
                return Err(MatrixError::EnvNotFound {
                    env: name,
                    referenced_by: "envlist".to_string(),
                });
            }
            ordered.push(name);
        }
        for name in defined_order {
            if !ordered.contains(&name) {
                ordered.push(name);
            }
        }

        let mut matrix = Matrix::default();
        for name in &ordered {
            let (_, raw) = defined[name];
            let mut depends = Vec::new();
            for expr in &raw.depends {
                for dep in expand_factors(expr)? {
                    if !defined.contains_key(&dep) {
                        return Err(MatrixError::EnvNotFound {
                            env: dep,
                            referenced_by: name.clone(),
                        });
                    }
                    if !depends.contains(&dep) {
                        depends.push(dep);
                    }
                }
            }

            matrix.push(EnvSpec {
                name: name.clone(),
                factors: factors_of(name),
                description: raw.description.clone(),
                interpreter: raw.interpreter.clone(),
                deps: raw.deps.clone(),
                commands_pre: raw.commands_pre.clone(),
                commands: raw.commands.clone(),
                depends,
                env_vars: raw.env.clone(),
                workdir: raw.workdir.clone(),
                skip_install: raw.skip_install,
                artifact: raw.artifact.clone(),
            });
        }

        Ok(matrix)
    }

    fn push(&mut self, spec: EnvSpec) {
        self.index.insert(spec.name.clone(), self.envs.len());
        self.envs.push(spec);
    }

    /// Look up an environment by concrete name.
    pub fn get(&self, name: &str) -> Option<&EnvSpec> {
        self.index.get(name).map(|&i| &self.envs[i])
    }

    /// Position of `name` in matrix order, used as a deterministic
    /// tie-break during planning.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All environments in matrix order.
    pub fn envs(&self) -> &[EnvSpec] {
        &self.envs
    }

    /// Number of concrete environments.
    pub fn len(&self) -> usize {
        self.envs.len()
    }

    /// Whether the matrix is empty.
    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    /// Deterministic digest of the ordered environment names.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for spec in &self.envs {
            hasher.update(spec.name.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatrixConfig;

    fn sample() -> MatrixConfig {
        MatrixConfig::parse(
            r#"
version = "1"

[options]
envlist = ["clean", "py{311,312}{,-mindeps}", "report"]

[envs.clean]
commands = [["coverage", "erase"]]

[envs."py{311,312}{,-mindeps}"]
deps.default = ["pytest>=7"]
deps.mindeps = ["pytest==7.0.0"]
commands = [["pytest"]]
depends = ["clean"]

[envs.report]
commands = [["coverage", "report"]]
depends = ["py{311,312}{,-mindeps}"]

[envs.lint]
commands = [["flake8"]]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_matrix_order_follows_envlist_then_name() {
        let matrix = Matrix::from_config(&sample()).unwrap();
        let names: Vec<&str> = matrix.envs().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "clean",
                "py311",
                "py311-mindeps",
                "py312",
                "py312-mindeps",
                "report",
                "lint",
            ]
        );
    }

    #[test]
    fn test_matrix_expansion_is_deterministic() {
        let config = sample();
        let a = Matrix::from_config(&config).unwrap();
        let b = Matrix::from_config(&config).unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_depends_expand_to_concrete_names() {
        let matrix = Matrix::from_config(&sample()).unwrap();
        let report = matrix.get("report").unwrap();
        assert_eq!(
            report.depends,
            vec!["py311", "py311-mindeps", "py312", "py312-mindeps"]
        );
    }

    #[test]
    fn test_unknown_depends_rejected() {
        let config = MatrixConfig::parse(
            r#"
version = "1"

[envs.a]
commands = [["true"]]
depends = ["nope"]
"#,
        )
        .unwrap();
        let err = Matrix::from_config(&config).unwrap_err();
        assert!(matches!(err, MatrixError::EnvNotFound { .. }));
    }

    #[test]
    fn test_unknown_envlist_entry_rejected() {
        let config = MatrixConfig::parse(
            r#"
version = "1"

[options]
envlist = ["ghost"]

[envs.real]
commands = [["true"]]
"#,
        )
        .unwrap();
        let err = Matrix::from_config(&config).unwrap_err();
        assert!(matches!(err, MatrixError::EnvNotFound { .. }));
    }

    #[test]
    fn test_variant_selector_overrides_default_deps() {
        let matrix = Matrix::from_config(&sample()).unwrap();
        let default = matrix.get("py311").unwrap();
        assert_eq!(default.resolved_deps(), ["pytest>=7"]);

        let mindeps = matrix.get("py311-mindeps").unwrap();
        assert_eq!(mindeps.resolved_deps(), ["pytest==7.0.0"]);
    }

    #[test]
    fn test_overlapping_definitions_rejected() {
        let config = MatrixConfig::parse(
            r#"
version = "1"

[envs."py{311,312}"]
commands = [["true"]]

[envs.py311]
commands = [["true"]]
"#,
        )
        .unwrap();
        let err = Matrix::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
