//! Task records store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::{TaskRecord, TaskStatus};

/// Repository interface for task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Bulk-insert the task records of a freshly materialized workflow.
    async fn create_many(&self, tasks: &[TaskRecord]) -> DomainResult<()>;

    /// Fetch a task by its compound key.
    async fn get(&self, run_id: &str, task_id: &str) -> DomainResult<Option<TaskRecord>>;

    /// Overwrite an existing task record.
    async fn update(&self, task: &TaskRecord) -> DomainResult<()>;

    /// All tasks of a run.
    async fn list_by_run(&self, run_id: &str) -> DomainResult<Vec<TaskRecord>>;

    /// Tasks of a run in any of the given statuses.
    async fn list_by_run_and_status(
        &self,
        run_id: &str,
        statuses: &[TaskStatus],
    ) -> DomainResult<Vec<TaskRecord>>;

    /// Tasks across all runs in any of the given statuses whose
    /// status-relevant timestamp predates `cutoff` and which have not yet
    /// been flagged for an SLA violation.
    async fn list_stale(
        &self,
        statuses: &[TaskStatus],
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<TaskRecord>>;

    /// Task counts per status for one run.
    async fn count_by_status(&self, run_id: &str) -> DomainResult<HashMap<TaskStatus, u64>>;
}
