//! Workflow records store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{WorkflowRecord, WorkflowStatus};

/// Repository interface for workflow run persistence.
///
/// The coordinator serializes all writes for a given run behind its per-run
/// lock, so implementations only need to be safe under concurrent access
/// across runs.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Persist a new workflow record.
    async fn create(&self, record: &WorkflowRecord) -> DomainResult<()>;

    /// Fetch a workflow by run id.
    async fn get(&self, run_id: &str) -> DomainResult<Option<WorkflowRecord>>;

    /// Overwrite an existing workflow record.
    async fn update(&self, record: &WorkflowRecord) -> DomainResult<()>;

    /// List workflows in any of the given statuses.
    async fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> DomainResult<Vec<WorkflowRecord>>;

    /// List cancelled or cancelling workflows, newest cancellation first.
    async fn list_cancelled(
        &self,
        limit: usize,
        offset: usize,
        client_id: Option<&str>,
    ) -> DomainResult<Vec<WorkflowRecord>>;
}
