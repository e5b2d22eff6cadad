//! Cancellation set port.

use async_trait::async_trait;

/// The authoritative set of run ids whose tasks must not start new work.
///
/// Workers consult this before executing a dequeued task and again after an
/// outbound agent call returns, so a membership test must be cheap.
/// Entries carry a TTL at least as long as the longest workflow.
#[async_trait]
pub trait CancellationSet: Send + Sync {
    async fn add(&self, run_id: &str);

    async fn remove(&self, run_id: &str);

    async fn contains(&self, run_id: &str) -> bool;
}
