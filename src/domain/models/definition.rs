//! Workflow definition — the validated DAG handed to the coordinator.
//!
//! Upstream surfaces (HTTP API, natural-language translator) produce these.
//! The engine only consumes them; structural and graph validation happens in
//! `init_workflow` before any task record is materialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// A single task in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Identifier, unique within the workflow.
    pub id: String,
    /// Agent that executes this task.
    pub agent: String,
    /// Action exposed by the agent.
    pub action: String,
    /// Opaque parameters forwarded to the agent verbatim.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Predecessor task ids.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional user priority in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    /// Optional completion deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

/// A workflow definition: a named DAG of tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    /// Arbitrary metadata carried through to the workflow record.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl WorkflowDefinition {
    /// Structural validation: non-empty ids, unique ids, priorities in range,
    /// no self-dependencies, no duplicate dependency entries.
    ///
    /// Graph-level checks (dependencies exist, acyclicity) live in the
    /// dependency resolver and run during `init_workflow`.
    pub fn validate(&self) -> DomainResult<()> {
        if self.tasks.is_empty() {
            return Err(DomainError::InvalidDefinition(
                "workflow has no tasks".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(DomainError::InvalidDefinition(
                    "task id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(DomainError::InvalidDefinition(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
            if task.agent.trim().is_empty() || task.action.trim().is_empty() {
                return Err(DomainError::InvalidDefinition(format!(
                    "task '{}' is missing agent or action",
                    task.id
                )));
            }
            if let Some(p) = task.priority {
                if !(0.0..=1.0).contains(&p) {
                    return Err(DomainError::InvalidDefinition(format!(
                        "task '{}' priority {p} outside [0, 1]",
                        task.id
                    )));
                }
            }
            if task.depends_on.iter().any(|d| d == &task.id) {
                return Err(DomainError::InvalidDefinition(format!(
                    "task '{}' depends on itself",
                    task.id
                )));
            }
            let mut deps = std::collections::HashSet::new();
            for dep in &task.depends_on {
                if !deps.insert(dep.as_str()) {
                    return Err(DomainError::InvalidDefinition(format!(
                        "task '{}' lists dependency '{dep}' more than once",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a task definition by id.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            agent: "eda".to_string(),
            action: "profile".to_string(),
            params: serde_json::Value::Null,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            priority: None,
            deadline: None,
        }
    }

    #[test]
    fn valid_definition_passes() {
        let def = WorkflowDefinition {
            name: Some("pipeline".to_string()),
            tasks: vec![task("a", &[]), task("b", &["a"])],
            metadata: serde_json::Value::Null,
        };
        assert!(def.validate().is_ok());
    }

    #[test]
    fn empty_workflow_rejected() {
        let def = WorkflowDefinition::default();
        assert!(matches!(
            def.validate(),
            Err(DomainError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let def = WorkflowDefinition {
            name: None,
            tasks: vec![task("a", &[]), task("a", &[])],
            metadata: serde_json::Value::Null,
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn self_dependency_rejected() {
        let def = WorkflowDefinition {
            name: None,
            tasks: vec![task("a", &["a"])],
            metadata: serde_json::Value::Null,
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn out_of_range_priority_rejected() {
        let mut t = task("a", &[]);
        t.priority = Some(1.5);
        let def = WorkflowDefinition {
            name: None,
            tasks: vec![t],
            metadata: serde_json::Value::Null,
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
name: demo
tasks:
  - id: load
    agent: eda
    action: load_data
    params:
      path: data.csv
  - id: profile
    agent: eda
    action: profile
    depends_on: [load]
    priority: 0.8
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.tasks.len(), 2);
        assert_eq!(def.tasks[1].depends_on, vec!["load".to_string()]);
        assert_eq!(def.tasks[0].params, json!({"path": "data.csv"}));
        assert!(def.validate().is_ok());
    }
}
