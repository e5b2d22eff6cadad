//! Engine event model.
//!
//! Every lifecycle transition the engine makes is announced as a typed
//! event. The event bus wraps these in sequence-numbered envelopes before
//! fan-out so subscribers can detect gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::FailureKind;

use super::workflow::WorkflowCounters;

/// Which resource an SLA violation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaResource {
    Task,
    Workflow,
    /// Workflow still running with nothing queued or executing.
    Deadlock,
}

impl std::fmt::Display for SlaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Workflow => write!(f, "workflow"),
            Self::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// Typed event published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    TaskStarted {
        run_id: String,
        task_id: String,
        agent: String,
        action: String,
        /// 1-based attempt number (retries + 1).
        attempt: u32,
    },
    TaskSuccess {
        run_id: String,
        task_id: String,
        agent: String,
        action: String,
        runtime_s: f64,
        result: serde_json::Value,
    },
    TaskFailed {
        run_id: String,
        task_id: String,
        agent: String,
        action: String,
        error: String,
        kind: FailureKind,
        retries: u32,
        will_retry: bool,
    },
    TaskCancelled {
        run_id: String,
        task_id: String,
        reason: String,
    },
    WorkflowStarted {
        run_id: String,
    },
    WorkflowCompleted {
        run_id: String,
        counters: WorkflowCounters,
    },
    WorkflowFailed {
        run_id: String,
        counters: WorkflowCounters,
    },
    WorkflowCancellationInitiated {
        run_id: String,
        reason: String,
        cancelled_by: String,
    },
    SlaViolation {
        resource: SlaResource,
        run_id: String,
        task_id: Option<String>,
        age_s: f64,
        threshold_s: u64,
    },
}

impl EngineEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            Self::TaskStarted { run_id, .. }
            | Self::TaskSuccess { run_id, .. }
            | Self::TaskFailed { run_id, .. }
            | Self::TaskCancelled { run_id, .. }
            | Self::WorkflowStarted { run_id }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. }
            | Self::WorkflowCancellationInitiated { run_id, .. }
            | Self::SlaViolation { run_id, .. } => run_id,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "TASK_STARTED",
            Self::TaskSuccess { .. } => "TASK_SUCCESS",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::TaskCancelled { .. } => "TASK_CANCELLED",
            Self::WorkflowStarted { .. } => "WORKFLOW_STARTED",
            Self::WorkflowCompleted { .. } => "WORKFLOW_COMPLETED",
            Self::WorkflowFailed { .. } => "WORKFLOW_FAILED",
            Self::WorkflowCancellationInitiated { .. } => "WORKFLOW_CANCELLATION_INITIATED",
            Self::SlaViolation { .. } => "SLA_VIOLATION",
        }
    }

    /// Task id, for task-scoped events.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskSuccess { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id, .. } => Some(task_id),
            Self::SlaViolation { task_id, .. } => task_id.as_deref(),
            _ => None,
        }
    }
}

/// Envelope assigned by the event bus at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    /// Monotonically increasing per-process sequence number.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}
