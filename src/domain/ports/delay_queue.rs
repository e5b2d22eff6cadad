//! Delay queue port.
//!
//! Time-keyed queue holding tasks until their retry due time. Backed by an
//! ordered set scored by due timestamp; the in-memory implementation is the
//! single-process fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Compound key identifying a task across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayKey {
    pub run_id: String,
    pub task_id: String,
}

impl DelayKey {
    pub fn new(run_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl std::fmt::Display for DelayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.run_id, self.task_id)
    }
}

/// Ordered-by-due-time queue capability used by the retry tracker.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    /// Insert or re-score an entry. `due_ts` is a unix timestamp in seconds.
    async fn insert(&self, key: DelayKey, due_ts: f64) -> DomainResult<()>;

    /// Remove a single entry; returns whether it existed.
    async fn remove(&self, key: &DelayKey) -> DomainResult<bool>;

    /// Remove every entry belonging to a run; returns how many were dropped.
    async fn remove_run(&self, run_id: &str) -> DomainResult<usize>;

    /// Atomically fetch and remove all entries with `due_ts <= now`.
    async fn pop_due(&self, now: f64) -> DomainResult<Vec<DelayKey>>;

    /// Number of pending entries.
    async fn pending_count(&self) -> DomainResult<usize>;

    /// Pending entries with their due timestamps, soonest first.
    async fn entries(&self, limit: usize) -> DomainResult<Vec<(DelayKey, f64)>>;
}
