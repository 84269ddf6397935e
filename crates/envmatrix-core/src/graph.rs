//! Dependency graph over selected environments and level-ordered planning.
//!
//! Environments are nodes in a DAG; an edge `A → B` means "B depends on A" —
//! A must complete before B may run. Topological ordering uses Kahn's
//! algorithm with level tracking so same-level environments can run in
//! parallel. Ties within a level are broken by node insertion order, which
//! the planner sets to matrix order, keeping plans and reports stable.

use std::collections::{HashMap, HashSet};

use crate::error::{MatrixError, MatrixResult};

/// Directed dependency graph over environment names.
#[derive(Debug, Clone, Default)]
pub struct EnvDependencyGraph {
    /// Insertion order of nodes; also the deterministic tie-break order.
    order: Vec<String>,
    positions: HashMap<String, usize>,
    /// `dependency → {dependent, ...}` (downstream adjacency)
    downstream: HashMap<String, HashSet<String>>,
    /// `dependent → {dependency, ...}` (upstream adjacency)
    upstream: HashMap<String, HashSet<String>>,
}

impl EnvDependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment. Idempotent.
    pub fn add_node(&mut self, name: &str) {
        if self.positions.contains_key(name) {
            return;
        }
        self.positions.insert(name.to_string(), self.order.len());
        self.order.push(name.to_string());
        self.downstream.entry(name.to_string()).or_default();
        self.upstream.entry(name.to_string()).or_default();
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Add a directed edge: `dependent` depends on `dependency`.
    ///
    /// Both nodes must already be registered. Returns
    /// [`MatrixError::DependencyCycle`] if the edge would introduce a cycle
    /// (checked via DFS before the edge is committed) and
    /// [`MatrixError::EnvNotFound`] if either node is absent.
    pub fn add_dependency(&mut self, dependency: &str, dependent: &str) -> MatrixResult<()> {
        if !self.positions.contains_key(dependency) {
            return Err(MatrixError::EnvNotFound {
                env: dependency.to_string(),
                referenced_by: dependent.to_string(),
            });
        }
        if !self.positions.contains_key(dependent) {
            return Err(MatrixError::EnvNotFound {
                env: dependent.to_string(),
                referenced_by: dependency.to_string(),
            });
        }

        // The edge goes in first; the cycle walk below expects it.
        self.downstream
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.upstream
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());

        if let Some(cycle) = self.find_cycle_through(dependent) {
            // A rejected edge must not stay in the adjacency maps.
            self.downstream
                .get_mut(dependency)
                .unwrap()
                .remove(dependent);
            self.upstream.get_mut(dependent).unwrap().remove(dependency);
            return Err(MatrixError::DependencyCycle { envs: cycle });
        }

        Ok(())
    }

    /// Direct dependencies of `name` (environments it depends on).
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .upstream
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        deps.sort_unstable_by_key(|d| self.positions[*d]);
        deps
    }

    /// Partition nodes into dependency levels via Kahn's algorithm.
    ///
    /// Level N environments depend only on environments in levels < N and
    /// may run in any order relative to each other. Within a level, names
    /// appear in insertion order. Returns [`MatrixError::DependencyCycle`]
    /// when not all nodes can be levelled.
    pub fn levels(&self) -> MatrixResult<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), 0))
            .collect();

        for dependents in self.downstream.values() {
            for dep in dependents {
                *in_degree.get_mut(dep.as_str()).unwrap() += 1;
            }
        }

        let mut current: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree[name] == 0)
            .collect();

        let mut levels = Vec::new();
        let mut placed = 0usize;

        while !current.is_empty() {
            placed += current.len();
            let mut next: Vec<&str> = Vec::new();
            for name in &current {
                if let Some(dependents) = self.downstream.get(*name) {
                    for dep in dependents {
                        let deg = in_degree.get_mut(dep.as_str()).unwrap();
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(dep.as_str());
                        }
                    }
                }
            }
            next.sort_unstable_by_key(|name| self.positions[*name]);
            levels.push(current.iter().map(|s| s.to_string()).collect());
            current = next;
        }

        if placed != self.order.len() {
            let remaining: Vec<String> = self
                .order
                .iter()
                .filter(|name| in_degree[name.as_str()] > 0)
                .cloned()
                .collect();
            return Err(MatrixError::DependencyCycle { envs: remaining });
        }

        Ok(levels)
    }

    /// Walk downstream edges from `start`; a path that revisits one of its
    /// own nodes is returned as the cycle.
    fn find_cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if path.iter().any(|p| p == node) {
            path.push(node.to_string());
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.to_string());
        path.push(node.to_string());

        if let Some(dependents) = self.downstream.get(node) {
            for dep in dependents {
                if self.dfs_cycle(dep, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_chain() -> EnvDependencyGraph {
        // clean → test → report
        let mut g = EnvDependencyGraph::new();
        g.add_node("clean");
        g.add_node("test");
        g.add_node("report");
        g.add_dependency("clean", "test").unwrap();
        g.add_dependency("test", "report").unwrap();
        g
    }

    #[test]
    fn test_levels_respect_dependency_order() {
        let g = three_chain();
        let levels = g.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["clean"]);
        assert_eq!(levels[1], vec!["test"]);
        assert_eq!(levels[2], vec!["report"]);
    }

    #[test]
    fn test_independent_nodes_share_a_level_in_insertion_order() {
        let mut g = EnvDependencyGraph::new();
        g.add_node("clean");
        g.add_node("testB");
        g.add_node("testA");
        g.add_dependency("clean", "testB").unwrap();
        g.add_dependency("clean", "testA").unwrap();
        let levels = g.levels().unwrap();
        assert_eq!(levels[0], vec!["clean"]);
        // Insertion order, not lexicographic.
        assert_eq!(levels[1], vec!["testB", "testA"]);
    }

    #[test]
    fn test_cycle_detection_rejects_mutual_dependency() {
        let mut g = EnvDependencyGraph::new();
        g.add_node("x");
        g.add_node("y");
        g.add_dependency("x", "y").unwrap();
        let result = g.add_dependency("y", "x");
        assert!(matches!(result, Err(MatrixError::DependencyCycle { .. })));
    }

    #[test]
    fn test_missing_node_rejected() {
        let mut g = EnvDependencyGraph::new();
        g.add_node("a");
        let r = g.add_dependency("a", "missing");
        assert!(matches!(r, Err(MatrixError::EnvNotFound { .. })));
    }

    #[test]
    fn test_diamond_resolves_to_three_levels() {
        // build → {testA, testB} → report
        let mut g = EnvDependencyGraph::new();
        for name in ["build", "testA", "testB", "report"] {
            g.add_node(name);
        }
        g.add_dependency("build", "testA").unwrap();
        g.add_dependency("build", "testB").unwrap();
        g.add_dependency("testA", "report").unwrap();
        g.add_dependency("testB", "report").unwrap();

        let levels = g.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1], vec!["testA", "testB"]);
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut g = EnvDependencyGraph::new();
        g.add_node("a");
        g.add_node("a");
        assert_eq!(g.levels().unwrap(), vec![vec!["a".to_string()]]);
    }
}
