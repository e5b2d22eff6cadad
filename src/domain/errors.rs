//! Domain error types for the drover workflow engine.
//!
//! This module defines all error types using thiserror for structured error
//! handling, plus the failure taxonomy the coordinator uses to gate retries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Errors raised by the engine core.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Workflow with the given run ID was not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Task was not found within its workflow
    #[error("Task not found: {run_id}:{task_id}")]
    TaskNotFound { run_id: String, task_id: String },

    /// Operation rejected because the workflow already reached a terminal state
    #[error("Workflow {run_id} is already terminal ({status})")]
    AlreadyTerminal { run_id: String, status: String },

    /// Invalid task status transition attempted
    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    /// Workflow definition failed structural validation
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A cycle was detected in the task dependency graph
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Agent name not present in the registry
    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),

    /// Action not exposed by the named agent
    #[error("Unknown action '{action}' for agent '{agent}'")]
    UnknownAction { agent: String, action: String },

    /// Underlying state store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Event could not be published
    #[error("Event publish failed: {0}")]
    Publish(String),
}

impl DomainError {
    /// Returns true if this error is transient and could succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Publish(_))
    }
}

/// Classification of a task failure.
///
/// The coordinator consults this to decide whether a failed task goes back
/// through the retry tracker or terminates the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout, connection refused, 5xx from the agent. Retriable.
    Transient,
    /// 4xx from the agent or malformed params. Terminal.
    Validation,
    /// Retry count reached the configured cap. Terminal.
    Exhausted,
    /// Task or workflow SLA violation.
    DeadlineExceeded,
    /// Task or workflow cancelled while running. Not a failure for counters.
    Cancelled,
    /// Coordinator invariant violation. Logged loudly, workflow failed.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::Exhausted => "exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Whether the coordinator may hand this failure to the retry tracker.
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
