//! Execution planning: selection closure and dependency-ordered grouping.

use tracing::warn;

use crate::error::{MatrixError, MatrixResult};
use crate::factor::expand_all;
use crate::graph::EnvDependencyGraph;
use crate::spec::Matrix;

/// Planning options, passed explicitly rather than read from ambient state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Drop `depends` edges to unselected environments with a warning
    /// instead of pulling the dependency into the plan.
    pub skip_unlisted_deps: bool,
}

/// Environments that may run in any order relative to each other.
#[derive(Debug, Clone)]
pub struct PlanGroup {
    pub envs: Vec<String>,
}

/// A dependency-ordered execution plan over the selected environments.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Groups in execution order; every group's members depend only on
    /// members of earlier groups.
    pub groups: Vec<PlanGroup>,

    /// Environments pulled into the plan implicitly because a selected
    /// environment depends on them.
    pub implicit: Vec<String>,
}

impl ExecutionPlan {
    /// Total environments across all groups.
    pub fn env_count(&self) -> usize {
        self.groups.iter().map(|g| g.envs.len()).sum()
    }

    /// All environment names in plan order.
    pub fn env_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flat_map(|g| g.envs.iter().map(String::as_str))
    }
}

/// Compute the execution plan for `selection` over `matrix`.
///
/// Selection entries may use factor syntax. Dependencies of selected
/// environments are added implicitly and transitively — a dependency must
/// run even when not explicitly requested — unless
/// [`PlanOptions::skip_unlisted_deps`] is set, in which case the edge is
/// dropped with a warning.
///
/// Fails with [`MatrixError::EnvNotFound`] when the selection names an
/// unknown environment and [`MatrixError::DependencyCycle`] when the
/// `depends` relation is cyclic within the planned set. Both are raised
/// before any execution.
pub fn plan(
    matrix: &Matrix,
    selection: &[String],
    options: PlanOptions,
) -> MatrixResult<ExecutionPlan> {
    let selected = expand_all(selection)?;
    for name in &selected {
        if matrix.get(name).is_none() {
            return Err(MatrixError::EnvNotFound {
                env: name.clone(),
                referenced_by: "selection".to_string(),
            });
        }
    }

    // Closure over `depends`, breadth-first, keeping discovery order.
    let mut planned: Vec<String> = selected.clone();
    let mut implicit: Vec<String> = Vec::new();
    let mut cursor = 0;
    while cursor < planned.len() {
        let name = planned[cursor].clone();
        cursor += 1;
        let Some(spec) = matrix.get(&name) else {
            continue;
        };
        for dep in &spec.depends {
            if planned.contains(dep) {
                continue;
            }
            if options.skip_unlisted_deps {
                warn!(
                    env = %name,
                    dependency = %dep,
                    "dropping depends edge to unselected environment"
                );
                continue;
            }
            planned.push(dep.clone());
            implicit.push(dep.clone());
        }
    }

    // Stable node order: matrix order, so plans and reports are reproducible.
    planned.sort_unstable_by_key(|name| matrix.position(name));

    let mut graph = EnvDependencyGraph::new();
    for name in &planned {
        graph.add_node(name);
    }
    for name in &planned {
        let Some(spec) = matrix.get(name) else {
            continue;
        };
        for dep in &spec.depends {
            if graph.contains(dep) {
                graph.add_dependency(dep, name)?;
            }
        }
    }

    let groups = graph
        .levels()?
        .into_iter()
        .map(|envs| PlanGroup { envs })
        .collect();

    Ok(ExecutionPlan { groups, implicit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatrixConfig;

    fn coverage_matrix() -> Matrix {
        let config = MatrixConfig::parse(
            r#"
version = "1"

[options]
envlist = ["clean", "testA", "testB", "report"]

[envs.clean]
commands = [["coverage", "erase"]]

[envs.testA]
commands = [["pytest", "a"]]
depends = ["clean"]

[envs.testB]
commands = [["pytest", "b"]]
depends = ["clean"]

[envs.report]
commands = [["coverage", "report"]]
depends = ["testA", "testB"]
"#,
        )
        .unwrap();
        Matrix::from_config(&config).unwrap()
    }

    #[test]
    fn test_plan_groups_coverage_flow() {
        let matrix = coverage_matrix();
        let selection = vec![
            "clean".to_string(),
            "testA".to_string(),
            "testB".to_string(),
            "report".to_string(),
        ];
        let plan = plan(&matrix, &selection, PlanOptions::default()).unwrap();

        let groups: Vec<Vec<String>> = plan.groups.iter().map(|g| g.envs.clone()).collect();
        assert_eq!(
            groups,
            vec![
                vec!["clean".to_string()],
                vec!["testA".to_string(), "testB".to_string()],
                vec!["report".to_string()],
            ]
        );
        assert!(plan.implicit.is_empty());
    }

    #[test]
    fn test_unselected_dependency_is_pulled_in() {
        let matrix = coverage_matrix();
        let plan = plan(&matrix, &["report".to_string()], PlanOptions::default()).unwrap();

        let names: Vec<&str> = plan.env_names().collect();
        assert_eq!(names, vec!["clean", "testA", "testB", "report"]);
        assert_eq!(plan.implicit.len(), 3);
    }

    #[test]
    fn test_skip_unlisted_deps_drops_edges() {
        let matrix = coverage_matrix();
        let options = PlanOptions {
            skip_unlisted_deps: true,
        };
        let plan = plan(&matrix, &["report".to_string()], options).unwrap();
        assert_eq!(plan.env_count(), 1);
        assert_eq!(plan.groups[0].envs, vec!["report"]);
        assert!(plan.implicit.is_empty());
    }

    #[test]
    fn test_every_env_appears_after_its_transitive_deps() {
        let matrix = coverage_matrix();
        let selection = vec!["report".to_string(), "testA".to_string()];
        let plan = plan(&matrix, &selection, PlanOptions::default()).unwrap();

        let order: Vec<&str> = plan.env_names().collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("clean") < pos("testA"));
        assert!(pos("clean") < pos("testB"));
        assert!(pos("testA") < pos("report"));
        assert!(pos("testB") < pos("report"));
    }

    #[test]
    fn test_cyclic_depends_rejected_before_execution() {
        let config = MatrixConfig::parse(
            r#"
version = "1"

[envs.a]
commands = [["true"]]
depends = ["b"]

[envs.b]
commands = [["true"]]
depends = ["a"]
"#,
        )
        .unwrap();
        let matrix = Matrix::from_config(&config).unwrap();
        let err = plan(
            &matrix,
            &["a".to_string(), "b".to_string()],
            PlanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MatrixError::DependencyCycle { .. }));
    }

    #[test]
    fn test_unknown_selection_rejected() {
        let matrix = coverage_matrix();
        let err = plan(&matrix, &["ghost".to_string()], PlanOptions::default()).unwrap_err();
        assert!(matches!(err, MatrixError::EnvNotFound { .. }));
    }

    #[test]
    fn test_selection_supports_factor_syntax() {
        let matrix = coverage_matrix();
        let plan = plan(
            &matrix,
            &["test{A,B}".to_string()],
            PlanOptions::default(),
        )
        .unwrap();
        let names: Vec<&str> = plan.env_names().collect();
        assert_eq!(names, vec!["clean", "testA", "testB"]);
    }
}
