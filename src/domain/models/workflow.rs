//! Workflow domain model.
//!
//! A workflow is one run of a task DAG. Only the coordinator may move a
//! workflow into a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::definition::WorkflowDefinition;
use super::task::TaskStatus;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Materialized but not yet started
    Pending,
    /// Tasks are being scheduled and executed
    Running,
    /// Every task completed successfully
    Completed,
    /// Some task failed terminally
    Failed,
    /// Cancellation initiated; in-flight tasks still draining
    Cancelling,
    /// Cancellation complete
    Cancelled,
    /// Parked for human intervention by an upstream surface
    NeedsHuman,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::NeedsHuman => "needs_human",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelling" => Some(Self::Cancelling),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "needs_human" => Some(Self::NeedsHuman),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task completion counters maintained on the workflow record.
///
/// Invariant: `completed_tasks + failed_tasks <= total_tasks`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCounters {
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
}

/// Who cancelled a workflow, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Persistent record of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub run_id: String,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub counters: WorkflowCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    /// Arbitrary caller-supplied metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sla_violated_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    pub fn new(
        run_id: String,
        definition: WorkflowDefinition,
        metadata: serde_json::Value,
        client_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let total_tasks = definition.tasks.len() as u32;
        Self {
            run_id,
            definition,
            status: WorkflowStatus::Pending,
            counters: WorkflowCounters {
                total_tasks,
                completed_tasks: 0,
                failed_tasks: 0,
            },
            cancellation: None,
            metadata,
            client_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            sla_violated_at: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }
}

/// Condensed workflow view returned by `list_cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub run_id: String,
    pub name: Option<String>,
    pub status: WorkflowStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub task_count: u32,
    pub client_id: Option<String>,
}

impl From<&WorkflowRecord> for WorkflowSummary {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            name: record.name().map(ToString::to_string),
            status: record.status,
            cancelled_at: record.cancellation.as_ref().map(|c| c.cancelled_at),
            cancellation_reason: record.cancellation.as_ref().map(|c| c.reason.clone()),
            cancelled_by: record.cancellation.as_ref().map(|c| c.cancelled_by.clone()),
            task_count: record.counters.total_tasks,
            client_id: record.client_id.clone(),
        }
    }
}

/// Full status report returned by `get_workflow_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub run_id: String,
    pub name: Option<String>,
    pub status: WorkflowStatus,
    pub counters: WorkflowCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    pub task_counts: HashMap<TaskStatus, u64>,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_counts_tasks() {
        let def: WorkflowDefinition = serde_yaml::from_str(
            "tasks:\n  - {id: a, agent: x, action: go}\n  - {id: b, agent: x, action: go, depends_on: [a]}\n",
        )
        .unwrap();
        let record = WorkflowRecord::new(
            "run_1".to_string(),
            def,
            serde_json::Value::Null,
            Some("client-7".to_string()),
        );
        assert_eq!(record.status, WorkflowStatus::Pending);
        assert_eq!(record.counters.total_tasks, 2);
        assert_eq!(record.counters.completed_tasks, 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Cancelling.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::NeedsHuman.is_terminal());
    }
}
