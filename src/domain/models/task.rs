//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute. They form a DAG
//! within a workflow run; the coordinator drives them through the status
//! machine defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::TaskDefinition;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not yet satisfied
    Pending,
    /// Task is in the scheduler queue awaiting a worker
    Queued,
    /// Task is currently executing on a worker
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed terminally
    Failed,
    /// Task failed transiently and is waiting out its backoff delay
    Retry,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "retry" => Some(Self::Retry),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task occupies a worker or a queue slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Retry)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Queued, Self::Cancelled],
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Retry, Self::Cancelled],
            Self::Retry => &[Self::Queued, Self::Cancelled],
            Self::Completed => &[],
            Self::Failed => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent record of a single task within a workflow run.
///
/// `task_id` is unique within its `run_id`. The `retries` field is the
/// authoritative retry counter; the retry tracker increments it when
/// scheduling a backoff entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub run_id: String,
    pub task_id: String,
    pub agent: String,
    pub action: String,
    /// Opaque parameter map forwarded to the agent; never inspected here.
    pub params: serde_json::Value,
    pub depends_on: Vec<String>,
    /// Count of still-unsatisfied predecessors.
    pub in_degree: u32,
    pub original_in_degree: u32,
    pub status: TaskStatus,
    pub retries: u32,
    pub last_error: Option<String>,
    /// Explicit priority in [0, 1]; defaults to 0.5 when unset.
    pub user_priority: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    /// Agent response payload on success.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sla_violated_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Materialize a task record from a validated definition.
    pub fn from_definition(run_id: &str, def: &TaskDefinition) -> Self {
        let now = Utc::now();
        let in_degree = def.depends_on.len() as u32;
        Self {
            run_id: run_id.to_string(),
            task_id: def.id.clone(),
            agent: def.agent.clone(),
            action: def.action.clone(),
            params: def.params.clone(),
            depends_on: def.depends_on.clone(),
            in_degree,
            original_in_degree: in_degree,
            status: TaskStatus::Pending,
            retries: 0,
            last_error: None,
            user_priority: def.priority,
            deadline: def.deadline,
            result: None,
            created_at: now,
            updated_at: now,
            queued_at: None,
            started_at: None,
            finished_at: None,
            sla_violated_at: None,
        }
    }

    /// Explicit priority, falling back to the neutral midpoint.
    pub fn priority_or_default(&self) -> f64 {
        self.user_priority.unwrap_or(0.5)
    }

    /// Deadline as a unix timestamp in seconds, if set.
    pub fn deadline_ts(&self) -> Option<f64> {
        self.deadline
            .map(|d| d.timestamp_millis() as f64 / 1000.0)
    }

    /// Timestamp the SLA monitor measures age against for the current status.
    pub fn sla_reference_time(&self) -> DateTime<Utc> {
        match self.status {
            TaskStatus::Queued => self.queued_at.unwrap_or(self.created_at),
            TaskStatus::Running => self.started_at.unwrap_or(self.created_at),
            _ => self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            agent: "eda".to_string(),
            action: "profile".to_string(),
            params: json!({"dataset": "train.csv"}),
            depends_on: deps.iter().map(ToString::to_string).collect(),
            priority: None,
            deadline: None,
        }
    }

    #[test]
    fn from_definition_sets_in_degree() {
        let task = TaskRecord::from_definition("run_1", &def("b", &["a", "c"]));
        assert_eq!(task.in_degree, 2);
        assert_eq!(task.original_in_degree, 2);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 0);
    }

    #[test]
    fn status_machine_matches_lifecycle() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Retry));
        assert!(TaskStatus::Retry.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));

        // No resurrection from terminal states.
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
        // Workers cannot skip the queue.
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn priority_defaults_to_midpoint() {
        let mut task = TaskRecord::from_definition("run_1", &def("a", &[]));
        assert!((task.priority_or_default() - 0.5).abs() < f64::EPSILON);
        task.user_priority = Some(0.9);
        assert!((task.priority_or_default() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Retry,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }
}
