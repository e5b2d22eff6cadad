//! Dependency graph validation.
//!
//! Runs before any task record is materialized: the coordinator never
//! handles a cyclic or dangling graph at runtime.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskDefinition;

/// Validates task dependency graphs and computes in-degrees.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check that every dependency names a task in the workflow.
    pub fn validate_dependencies(&self, tasks: &[TaskDefinition]) -> DomainResult<()> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for task in tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(DomainError::InvalidDefinition(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Detect a cycle via DFS with a recursion stack.
    ///
    /// Returns the offending path (closing back on its first node) when a
    /// cycle exists.
    pub fn detect_cycle(&self, tasks: &[TaskDefinition]) -> Option<Vec<String>> {
        let graph: HashMap<&str, &TaskDefinition> =
            tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: Vec<&str> = Vec::new();

        fn visit<'a>(
            id: &'a str,
            graph: &HashMap<&'a str, &'a TaskDefinition>,
            visited: &mut HashSet<&'a str>,
            on_stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            if let Some(pos) = on_stack.iter().position(|s| *s == id) {
                let mut cycle: Vec<String> =
                    on_stack[pos..].iter().map(ToString::to_string).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            if visited.contains(id) {
                return None;
            }

            on_stack.push(id);
            if let Some(task) = graph.get(id) {
                for dep in &task.depends_on {
                    if let Some(cycle) = visit(dep.as_str(), graph, visited, on_stack) {
                        return Some(cycle);
                    }
                }
            }
            on_stack.pop();
            visited.insert(id);
            None
        }

        for task in tasks {
            if let Some(cycle) = visit(task.id.as_str(), &graph, &mut visited, &mut on_stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// In-degree (number of predecessors) per task id.
    pub fn in_degrees(&self, tasks: &[TaskDefinition]) -> HashMap<String, u32> {
        tasks
            .iter()
            .map(|t| (t.id.clone(), t.depends_on.len() as u32))
            .collect()
    }

    /// Full graph validation used by `init_workflow`.
    pub fn validate(&self, tasks: &[TaskDefinition]) -> DomainResult<()> {
        self.validate_dependencies(tasks)?;
        if let Some(cycle) = self.detect_cycle(tasks) {
            return Err(DomainError::CircularDependency(cycle));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            agent: "x".to_string(),
            action: "work".to_string(),
            params: serde_json::Value::Null,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            priority: None,
            deadline: None,
        }
    }

    #[test]
    fn accepts_diamond() {
        let resolver = DependencyResolver::new();
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        assert!(resolver.validate(&tasks).is_ok());
        let degrees = resolver.in_degrees(&tasks);
        assert_eq!(degrees["a"], 0);
        assert_eq!(degrees["b"], 1);
        assert_eq!(degrees["d"], 2);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let resolver = DependencyResolver::new();
        let tasks = vec![task("a", &["ghost"])];
        assert!(matches!(
            resolver.validate(&tasks),
            Err(DomainError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn detects_two_node_cycle() {
        let resolver = DependencyResolver::new();
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let cycle = resolver.detect_cycle(&tasks).expect("cycle expected");
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3);
    }

    #[test]
    fn detects_long_cycle_behind_chain() {
        let resolver = DependencyResolver::new();
        let tasks = vec![
            task("entry", &[]),
            task("a", &["entry", "c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        assert!(matches!(
            resolver.validate(&tasks),
            Err(DomainError::CircularDependency(_))
        ));
    }

    #[test]
    fn acyclic_chain_passes() {
        let resolver = DependencyResolver::new();
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(resolver.detect_cycle(&tasks).is_none());
    }
}
