//! Agent registry.
//!
//! Runtime view of the agent-action matrix from configuration, used to
//! validate workflow definitions before materialization. An empty matrix
//! disables validation (useful for single-tenant deployments where the
//! upstream translator already constrains agents).

use std::collections::HashMap;

use tracing::debug;

use crate::domain::models::{EngineConfig, TaskDefinition};

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    matrix: HashMap<String, Vec<String>>,
}

impl AgentRegistry {
    pub fn new(matrix: HashMap<String, Vec<String>>) -> Self {
        Self { matrix }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let registry = Self::new(config.agent_actions.clone());
        debug!(agents = ?registry.agent_names(), "agent registry loaded");
        registry
    }

    /// Sorted list of registered agent names.
    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.matrix.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn actions_for(&self, agent: &str) -> &[String] {
        self.matrix.get(agent).map_or(&[], Vec::as_slice)
    }

    pub fn is_valid_agent(&self, agent: &str) -> bool {
        self.matrix.is_empty() || self.matrix.contains_key(agent)
    }

    pub fn is_valid_action(&self, agent: &str, action: &str) -> bool {
        if self.matrix.is_empty() {
            return true;
        }
        self.actions_for(agent).iter().any(|a| a == action)
    }

    /// Validate every task of a workflow against the matrix.
    ///
    /// Returns one message per violation; empty means valid.
    pub fn validate_tasks(&self, tasks: &[TaskDefinition]) -> Vec<String> {
        if self.matrix.is_empty() {
            return Vec::new();
        }

        let mut errors = Vec::new();
        for task in tasks {
            if !self.is_valid_agent(&task.agent) {
                errors.push(format!(
                    "task '{}': unknown agent '{}' (valid: {:?})",
                    task.id,
                    task.agent,
                    self.agent_names()
                ));
                continue;
            }
            if !self.is_valid_action(&task.agent, &task.action) {
                errors.push(format!(
                    "task '{}': agent '{}' does not expose action '{}' (valid: {:?})",
                    task.id,
                    task.agent,
                    task.action,
                    self.actions_for(&task.agent)
                ));
            }
        }
        errors
    }
}
