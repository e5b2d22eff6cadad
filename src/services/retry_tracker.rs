//! Retry tracker.
//!
//! Schedules exponential-backoff retries on the time-keyed delay queue and
//! polls due entries back into the scheduler. The tracker never decides
//! whether a failure is retriable; the coordinator gates on failure kind
//! before calling [`RetryTracker::schedule`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{RetryConfig, TaskRecord, TaskStatus};
use crate::domain::ports::{DelayKey, DelayQueue, TaskRepository};
use crate::services::scheduler::{unix_now, PriorityScheduler};

/// Retry tracker counters exposed for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryTrackerStats {
    pub retries_scheduled: u64,
    pub retries_executed: u64,
    pub retries_abandoned: u64,
}

/// Pending-retry view returned by [`RetryTracker::list_pending`].
#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    pub run_id: String,
    pub task_id: String,
    pub due_ts: f64,
    pub time_remaining_s: f64,
}

pub struct RetryTracker {
    scheduler: Arc<PriorityScheduler>,
    tasks: Arc<dyn TaskRepository>,
    delay_queue: Arc<dyn DelayQueue>,
    config: RetryConfig,
    running: AtomicBool,
    stats: Mutex<RetryTrackerStats>,
}

impl RetryTracker {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        tasks: Arc<dyn TaskRepository>,
        delay_queue: Arc<dyn DelayQueue>,
        config: RetryConfig,
    ) -> Self {
        Self {
            scheduler,
            tasks,
            delay_queue,
            config,
            running: AtomicBool::new(false),
            stats: Mutex::new(RetryTrackerStats::default()),
        }
    }

    /// Backoff delay for the given retry count: `min(base * 2^n, max)`.
    pub fn backoff_delay_s(&self, retries: u32) -> f64 {
        (self.config.backoff_base_s * 2f64.powi(retries.min(i32::MAX as u32) as i32))
            .min(self.config.backoff_max_s)
    }

    /// Schedule a retry for a failed task.
    ///
    /// Returns false when the retry budget is spent; the caller then treats
    /// the failure as terminal. On success the task's authoritative
    /// `retries` counter is incremented, the record moves to `Retry`, and a
    /// delay-queue entry is written (invariant: entry iff status Retry).
    pub async fn schedule(&self, task: &mut TaskRecord, error: &str) -> DomainResult<bool> {
        if task.retries >= self.config.max_retries {
            warn!(
                task_id = %task.task_id,
                run_id = %task.run_id,
                max_retries = self.config.max_retries,
                "retry budget exhausted, abandoning"
            );
            self.stats
                .lock()
                .expect("retry stats lock poisoned")
                .retries_abandoned += 1;
            return Ok(false);
        }

        let delay = self.backoff_delay_s(task.retries);
        let due_ts = unix_now() + delay;

        task.retries += 1;
        task.last_error = Some(error.to_string());
        task.status = TaskStatus::Retry;
        task.updated_at = Utc::now();
        self.tasks.update(task).await?;

        self.delay_queue
            .insert(DelayKey::new(&task.run_id, &task.task_id), due_ts)
            .await?;

        self.stats
            .lock()
            .expect("retry stats lock poisoned")
            .retries_scheduled += 1;
        info!(
            task_id = %task.task_id,
            run_id = %task.run_id,
            attempt = task.retries,
            max_retries = self.config.max_retries,
            delay_s = delay,
            "retry scheduled"
        );
        Ok(true)
    }

    /// Cancel a pending retry; true if an entry was removed.
    pub async fn cancel_retry(&self, run_id: &str, task_id: &str) -> DomainResult<bool> {
        let removed = self
            .delay_queue
            .remove(&DelayKey::new(run_id, task_id))
            .await?;
        if removed {
            debug!(task_id, run_id, "pending retry cancelled");
        }
        Ok(removed)
    }

    /// Drop every pending retry of a run.
    pub async fn cancel_run(&self, run_id: &str) -> DomainResult<usize> {
        self.delay_queue.remove_run(run_id).await
    }

    /// Start the background poll loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let tracker = Arc::clone(&self);
        let interval = std::time::Duration::from_secs_f64(self.config.poll_interval_s.max(0.01));
        tokio::spawn(async move {
            debug!("retry tracker polling started");
            while tracker.running.load(Ordering::SeqCst) {
                if let Err(e) = tracker.process_due().await {
                    error!(error = %e, "retry poll iteration failed");
                    // Back off so a broken store does not spin the loop.
                    tokio::time::sleep(interval * 5).await;
                    continue;
                }
                tokio::time::sleep(interval).await;
            }
            debug!("retry tracker polling stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Move every due entry back into the scheduler.
    ///
    /// Each entry is re-hydrated from the records store so the enqueued task
    /// carries the current retry count and parameters. Entries whose task is
    /// no longer in `Retry` (cancelled in the meantime) are dropped.
    pub async fn process_due(&self) -> DomainResult<()> {
        let due = self.delay_queue.pop_due(unix_now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "processing due retries");

        for key in due {
            let Some(mut task) = self.tasks.get(&key.run_id, &key.task_id).await? else {
                warn!(key = %key, "due retry references unknown task, dropping");
                continue;
            };
            if task.status != TaskStatus::Retry {
                debug!(
                    key = %key,
                    status = %task.status,
                    "due retry no longer pending, dropping"
                );
                continue;
            }

            task.status = TaskStatus::Queued;
            task.queued_at = Some(Utc::now());
            task.updated_at = Utc::now();
            self.tasks.update(&task).await?;
            self.scheduler.enqueue(task).await;

            self.stats
                .lock()
                .expect("retry stats lock poisoned")
                .retries_executed += 1;
            info!(key = %key, "retry re-enqueued");
        }
        Ok(())
    }

    /// Retry information for a single task, if one is pending.
    pub async fn retry_info(
        &self,
        run_id: &str,
        task_id: &str,
    ) -> DomainResult<Option<RetryInfo>> {
        let now = unix_now();
        Ok(self
            .delay_queue
            .entries(usize::MAX)
            .await?
            .into_iter()
            .find(|(key, _)| key.run_id == run_id && key.task_id == task_id)
            .map(|(key, due_ts)| RetryInfo {
                run_id: key.run_id,
                task_id: key.task_id,
                due_ts,
                time_remaining_s: (due_ts - now).max(0.0),
            }))
    }

    /// Pending retries with remaining delay, soonest first.
    pub async fn list_pending(&self, limit: usize) -> DomainResult<Vec<RetryInfo>> {
        let now = unix_now();
        Ok(self
            .delay_queue
            .entries(limit)
            .await?
            .into_iter()
            .map(|(key, due_ts)| RetryInfo {
                run_id: key.run_id,
                task_id: key.task_id,
                due_ts,
                time_remaining_s: (due_ts - now).max(0.0),
            })
            .collect())
    }

    pub async fn pending_count(&self) -> DomainResult<usize> {
        self.delay_queue.pending_count().await
    }

    pub fn stats(&self) -> RetryTrackerStats {
        self.stats
            .lock()
            .expect("retry stats lock poisoned")
            .clone()
    }
}
