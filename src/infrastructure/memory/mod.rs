//! In-memory implementations of every state-store port.
//!
//! These are the single-process fallback: when the SQLite store cannot be
//! opened the engine keeps functioning on these, losing durability across
//! restarts but not correctness. They are also the substrate for tests.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{TaskRecord, TaskStatus, WorkflowRecord, WorkflowStatus};
use crate::domain::ports::{
    CancellationSet, DelayKey, DelayQueue, RuntimeEstimateStore, TaskRepository,
    WorkflowRepository,
};

/// Workflow records held in a process-local map.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    runs: RwLock<HashMap<String, WorkflowRecord>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create(&self, record: &WorkflowRecord) -> DomainResult<()> {
        self.runs
            .write()
            .expect("run store poisoned")
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> DomainResult<Option<WorkflowRecord>> {
        Ok(self
            .runs
            .read()
            .expect("run store poisoned")
            .get(run_id)
            .cloned())
    }

    async fn update(&self, record: &WorkflowRecord) -> DomainResult<()> {
        self.runs
            .write()
            .expect("run store poisoned")
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> DomainResult<Vec<WorkflowRecord>> {
        Ok(self
            .runs
            .read()
            .expect("run store poisoned")
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn list_cancelled(
        &self,
        limit: usize,
        offset: usize,
        client_id: Option<&str>,
    ) -> DomainResult<Vec<WorkflowRecord>> {
        let mut cancelled: Vec<WorkflowRecord> = self
            .runs
            .read()
            .expect("run store poisoned")
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    WorkflowStatus::Cancelled | WorkflowStatus::Cancelling
                )
            })
            .filter(|r| client_id.is_none_or(|c| r.client_id.as_deref() == Some(c)))
            .cloned()
            .collect();
        cancelled.sort_by_key(|r| {
            std::cmp::Reverse(
                r.cancellation
                    .as_ref()
                    .map_or(r.updated_at, |c| c.cancelled_at),
            )
        });
        Ok(cancelled.into_iter().skip(offset).take(limit).collect())
    }
}

/// Task records held in a process-local map keyed by `(run_id, task_id)`.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<(String, String), TaskRecord>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create_many(&self, tasks: &[TaskRecord]) -> DomainResult<()> {
        let mut store = self.tasks.write().expect("task store poisoned");
        for task in tasks {
            store.insert((task.run_id.clone(), task.task_id.clone()), task.clone());
        }
        Ok(())
    }

    async fn get(&self, run_id: &str, task_id: &str) -> DomainResult<Option<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .expect("task store poisoned")
            .get(&(run_id.to_string(), task_id.to_string()))
            .cloned())
    }

    async fn update(&self, task: &TaskRecord) -> DomainResult<()> {
        self.tasks
            .write()
            .expect("task store poisoned")
            .insert((task.run_id.clone(), task.task_id.clone()), task.clone());
        Ok(())
    }

    async fn list_by_run(&self, run_id: &str) -> DomainResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .read()
            .expect("task store poisoned")
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(tasks)
    }

    async fn list_by_run_and_status(
        &self,
        run_id: &str,
        statuses: &[TaskStatus],
    ) -> DomainResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .read()
            .expect("task store poisoned")
            .values()
            .filter(|t| t.run_id == run_id && statuses.contains(&t.status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(tasks)
    }

    async fn list_stale(
        &self,
        statuses: &[TaskStatus],
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .expect("task store poisoned")
            .values()
            .filter(|t| {
                statuses.contains(&t.status)
                    && t.sla_violated_at.is_none()
                    && t.sla_reference_time() < cutoff
            })
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, run_id: &str) -> DomainResult<HashMap<TaskStatus, u64>> {
        let mut counts = HashMap::new();
        for task in self
            .tasks
            .read()
            .expect("task store poisoned")
            .values()
            .filter(|t| t.run_id == run_id)
        {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Delay queue over a plain vector; fine at fallback scale.
#[derive(Default)]
pub struct InMemoryDelayQueue {
    entries: Mutex<Vec<(DelayKey, f64)>>,
}

impl InMemoryDelayQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DelayQueue for InMemoryDelayQueue {
    async fn insert(&self, key: DelayKey, due_ts: f64) -> DomainResult<()> {
        let mut entries = self.entries.lock().expect("delay queue poisoned");
        if let Some(existing) = entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = due_ts;
        } else {
            entries.push((key, due_ts));
        }
        Ok(())
    }

    async fn remove(&self, key: &DelayKey) -> DomainResult<bool> {
        let mut entries = self.entries.lock().expect("delay queue poisoned");
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() < before)
    }

    async fn remove_run(&self, run_id: &str) -> DomainResult<usize> {
        let mut entries = self.entries.lock().expect("delay queue poisoned");
        let before = entries.len();
        entries.retain(|(k, _)| k.run_id != run_id);
        Ok(before - entries.len())
    }

    async fn pop_due(&self, now: f64) -> DomainResult<Vec<DelayKey>> {
        let mut entries = self.entries.lock().expect("delay queue poisoned");
        let mut due: Vec<(DelayKey, f64)> = Vec::new();
        entries.retain(|(key, due_ts)| {
            if *due_ts <= now {
                due.push((key.clone(), *due_ts));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(due.into_iter().map(|(key, _)| key).collect())
    }

    async fn pending_count(&self) -> DomainResult<usize> {
        Ok(self.entries.lock().expect("delay queue poisoned").len())
    }

    async fn entries(&self, limit: usize) -> DomainResult<Vec<(DelayKey, f64)>> {
        let mut entries = self
            .entries
            .lock()
            .expect("delay queue poisoned")
            .clone();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1));
        entries.truncate(limit);
        Ok(entries)
    }
}

/// Runtime estimates with the fixed EMA fold `0.7 * old + 0.3 * observed`.
#[derive(Default)]
pub struct InMemoryEstimateStore {
    estimates: RwLock<HashMap<(String, String), f64>>,
}

impl InMemoryEstimateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeEstimateStore for InMemoryEstimateStore {
    async fn get(&self, agent: &str, action: &str) -> Option<f64> {
        self.estimates
            .read()
            .expect("estimate store poisoned")
            .get(&(agent.to_string(), action.to_string()))
            .copied()
    }

    async fn observe(&self, agent: &str, action: &str, runtime_s: f64) {
        let mut estimates = self.estimates.write().expect("estimate store poisoned");
        let key = (agent.to_string(), action.to_string());
        let updated = match estimates.get(&key) {
            Some(old) => 0.7 * old + 0.3 * runtime_s,
            None => runtime_s,
        };
        estimates.insert(key, updated);
    }

    async fn entry_count(&self) -> usize {
        self.estimates
            .read()
            .expect("estimate store poisoned")
            .len()
    }
}

/// Cancellation set with per-entry TTL.
pub struct InMemoryCancellationSet {
    entries: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryCancellationSet {
    pub fn new(ttl_s: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_s.max(1)),
        }
    }

    fn prune(entries: &mut HashMap<String, Instant>, ttl: Duration) {
        let now = Instant::now();
        entries.retain(|_, added| now.duration_since(*added) < ttl);
    }
}

#[async_trait]
impl CancellationSet for InMemoryCancellationSet {
    async fn add(&self, run_id: &str) {
        let mut entries = self.entries.write().expect("cancellation set poisoned");
        Self::prune(&mut entries, self.ttl);
        entries.insert(run_id.to_string(), Instant::now());
    }

    async fn remove(&self, run_id: &str) {
        self.entries
            .write()
            .expect("cancellation set poisoned")
            .remove(run_id);
    }

    async fn contains(&self, run_id: &str) -> bool {
        let entries = self.entries.read().expect("cancellation set poisoned");
        entries
            .get(run_id)
            .is_some_and(|added| added.elapsed() < self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskDefinition;

    fn task(run: &str, id: &str, status: TaskStatus) -> TaskRecord {
        let def = TaskDefinition {
            id: id.to_string(),
            agent: "x".to_string(),
            action: "work".to_string(),
            params: serde_json::Value::Null,
            depends_on: Vec::new(),
            priority: None,
            deadline: None,
        };
        let mut record = TaskRecord::from_definition(run, &def);
        record.status = status;
        record
    }

    #[tokio::test]
    async fn delay_queue_pops_only_due_entries() {
        let queue = InMemoryDelayQueue::new();
        queue.insert(DelayKey::new("r", "a"), 100.0).await.unwrap();
        queue.insert(DelayKey::new("r", "b"), 200.0).await.unwrap();
        queue.insert(DelayKey::new("r", "c"), 50.0).await.unwrap();

        let due = queue.pop_due(150.0).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].task_id, "c");
        assert_eq!(due[1].task_id, "a");
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delay_queue_insert_rescores() {
        let queue = InMemoryDelayQueue::new();
        queue.insert(DelayKey::new("r", "a"), 100.0).await.unwrap();
        queue.insert(DelayKey::new("r", "a"), 500.0).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert!(queue.pop_due(200.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn estimate_store_applies_ema() {
        let store = InMemoryEstimateStore::new();
        assert_eq!(store.get("x", "work").await, None);

        store.observe("x", "work", 10.0).await;
        assert!((store.get("x", "work").await.unwrap() - 10.0).abs() < 1e-9);

        store.observe("x", "work", 20.0).await;
        // 0.7 * 10 + 0.3 * 20 = 13
        assert!((store.get("x", "work").await.unwrap() - 13.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancellation_set_membership() {
        let set = InMemoryCancellationSet::new(3600);
        assert!(!set.contains("run_1").await);
        set.add("run_1").await;
        assert!(set.contains("run_1").await);
        set.remove("run_1").await;
        assert!(!set.contains("run_1").await);
    }

    #[tokio::test]
    async fn task_repo_counts_and_filters() {
        let repo = InMemoryTaskRepository::new();
        repo.create_many(&[
            task("r1", "a", TaskStatus::Completed),
            task("r1", "b", TaskStatus::Queued),
            task("r1", "c", TaskStatus::Queued),
            task("r2", "a", TaskStatus::Pending),
        ])
        .await
        .unwrap();

        let counts = repo.count_by_status("r1").await.unwrap();
        assert_eq!(counts.get(&TaskStatus::Queued), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Completed), Some(&1));

        let queued = repo
            .list_by_run_and_status("r1", &[TaskStatus::Queued])
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(repo.list_by_run("r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_listing_honors_flag_and_cutoff() {
        let repo = InMemoryTaskRepository::new();
        let mut old = task("r1", "a", TaskStatus::Running);
        old.started_at = Some(Utc::now() - chrono::Duration::seconds(900));
        let mut fresh = task("r1", "b", TaskStatus::Running);
        fresh.started_at = Some(Utc::now());
        let mut flagged = task("r1", "c", TaskStatus::Running);
        flagged.started_at = Some(Utc::now() - chrono::Duration::seconds(900));
        flagged.sla_violated_at = Some(Utc::now());
        repo.create_many(&[old, fresh, flagged]).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::seconds(600);
        let stale = repo
            .list_stale(&[TaskStatus::Running], cutoff)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].task_id, "a");
    }

    #[tokio::test]
    async fn cancelled_listing_paginates_newest_first() {
        use crate::domain::models::{CancellationInfo, WorkflowDefinition};

        let repo = InMemoryWorkflowRepository::new();
        for (i, run) in ["r1", "r2", "r3"].iter().enumerate() {
            let mut record = WorkflowRecord::new(
                (*run).to_string(),
                WorkflowDefinition::default(),
                serde_json::Value::Null,
                Some("client".to_string()),
            );
            record.status = WorkflowStatus::Cancelled;
            record.cancellation = Some(CancellationInfo {
                reason: "test".to_string(),
                cancelled_by: "tester".to_string(),
                cancelled_at: Utc::now() + chrono::Duration::seconds(i as i64),
            });
            repo.create(&record).await.unwrap();
        }

        let page = repo.list_cancelled(2, 0, None).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].run_id, "r3");
        let rest = repo.list_cancelled(2, 2, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].run_id, "r1");
        assert!(repo
            .list_cancelled(10, 0, Some("nobody"))
            .await
            .unwrap()
            .is_empty());
    }
}
