//! Priority queue scheduler.
//!
//! Holds the shared ready queue as an in-memory heap with αβγ scoring:
//! `score = -(α/max(ERT, 1) + β·user_priority + γ·urgency)`, lower score
//! dequeues first. Ties break on earlier enqueue time so starved tasks
//! eventually surface.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::domain::models::{SchedulerConfig, TaskRecord};
use crate::domain::ports::RuntimeEstimateStore;

/// Current unix time in fractional seconds.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Task with its computed priority score.
#[derive(Debug, Clone)]
struct ScoredTask {
    score: f64,
    enqueue_time: f64,
    task: TaskRecord,
}

impl PartialEq for ScoredTask {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.enqueue_time == other.enqueue_time
    }
}

impl Eq for ScoredTask {}

impl PartialOrd for ScoredTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredTask {
    // BinaryHeap pops the greatest element; invert so the lowest score
    // (then the earliest enqueue) is considered greatest.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(other.enqueue_time.total_cmp(&self.enqueue_time))
    }
}

/// Scheduler counters exposed for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub tasks_enqueued: u64,
    pub tasks_dequeued: u64,
    pub current_queue_size: usize,
    pub avg_score: f64,
}

/// Queue entry view returned by [`PriorityScheduler::list`].
#[derive(Debug, Clone, Serialize)]
pub struct QueuedTaskInfo {
    pub run_id: String,
    pub task_id: String,
    pub agent: String,
    pub action: String,
    pub score: f64,
    pub enqueue_time: f64,
}

struct SchedulerInner {
    heap: BinaryHeap<ScoredTask>,
    stats: SchedulerStats,
}

impl SchedulerInner {
    fn refresh_stats(&mut self) {
        self.stats.current_queue_size = self.heap.len();
        self.stats.avg_score = if self.heap.is_empty() {
            0.0
        } else {
            self.heap.iter().map(|t| t.score).sum::<f64>() / self.heap.len() as f64
        };
    }
}

/// Thread-safe priority queue shared by every worker pool.
///
/// The heap lock is never held across an await point; score computation
/// (which consults the estimate store) happens before the lock is taken.
pub struct PriorityScheduler {
    alpha: f64,
    beta: f64,
    gamma: f64,
    ert_default: f64,
    estimates: Arc<dyn RuntimeEstimateStore>,
    inner: Mutex<SchedulerInner>,
}

impl PriorityScheduler {
    pub fn new(config: &SchedulerConfig, estimates: Arc<dyn RuntimeEstimateStore>) -> Self {
        Self {
            alpha: config.alpha,
            beta: config.beta,
            gamma: config.gamma,
            ert_default: config.ert_default_s,
            estimates,
            inner: Mutex::new(SchedulerInner {
                heap: BinaryHeap::new(),
                stats: SchedulerStats::default(),
            }),
        }
    }

    /// Compute the priority score for a task. Lower is earlier.
    pub async fn score(&self, task: &TaskRecord) -> f64 {
        let ert = self
            .estimates
            .get(&task.agent, &task.action)
            .await
            .unwrap_or(self.ert_default);
        let runtime_score = self.alpha / ert.max(1.0);

        let priority_score = self.beta * task.priority_or_default();

        let urgency = match task.deadline_ts() {
            Some(deadline) => 1.0 / (deadline - unix_now()).max(1.0),
            None => 0.0,
        };
        let urgency_score = self.gamma * urgency;

        -(runtime_score + priority_score + urgency_score)
    }

    /// Enqueue a task with its computed score.
    pub async fn enqueue(&self, task: TaskRecord) -> bool {
        let score = self.score(&task).await;
        let entry = ScoredTask {
            score,
            enqueue_time: unix_now(),
            task,
        };

        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        debug!(
            task_id = %entry.task.task_id,
            run_id = %entry.task.run_id,
            score,
            "task enqueued"
        );
        inner.heap.push(entry);
        inner.stats.tasks_enqueued += 1;
        inner.refresh_stats();
        true
    }

    /// Dequeue the lowest-scored task, optionally restricted to one agent.
    ///
    /// The filtered path scans the shared heap linearly for the best match;
    /// either way a task is delivered at most once.
    pub fn dequeue(&self, agent_filter: Option<&str>) -> Option<TaskRecord> {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        if inner.heap.is_empty() {
            return None;
        }

        let entry = match agent_filter {
            None => inner.heap.pop()?,
            Some(agent) => {
                let best = inner
                    .heap
                    .iter()
                    .filter(|e| e.task.agent == agent)
                    .max()
                    .map(|e| (e.task.run_id.clone(), e.task.task_id.clone()))?;

                let mut entries = std::mem::take(&mut inner.heap).into_vec();
                let pos = entries
                    .iter()
                    .position(|e| e.task.run_id == best.0 && e.task.task_id == best.1)?;
                let entry = entries.swap_remove(pos);
                inner.heap = BinaryHeap::from(entries);
                entry
            }
        };

        inner.stats.tasks_dequeued += 1;
        inner.refresh_stats();
        debug!(
            task_id = %entry.task.task_id,
            run_id = %entry.task.run_id,
            agent = %entry.task.agent,
            "task dequeued"
        );
        Some(entry.task)
    }

    /// Peek at the next task without removing it.
    pub fn peek(&self, agent_filter: Option<&str>) -> Option<TaskRecord> {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        match agent_filter {
            None => inner.heap.peek().map(|e| e.task.clone()),
            Some(agent) => inner
                .heap
                .iter()
                .filter(|e| e.task.agent == agent)
                .max()
                .map(|e| e.task.clone()),
        }
    }

    /// Queue size, optionally per agent.
    pub fn queue_size(&self, agent_filter: Option<&str>) -> usize {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        match agent_filter {
            None => inner.heap.len(),
            Some(agent) => inner
                .heap
                .iter()
                .filter(|e| e.task.agent == agent)
                .count(),
        }
    }

    /// Remove a specific task from the queue; true if it was present.
    pub fn remove(&self, run_id: &str, task_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        let before = inner.heap.len();
        inner
            .heap
            .retain(|e| !(e.task.run_id == run_id && e.task.task_id == task_id));
        let removed = inner.heap.len() < before;
        if removed {
            inner.refresh_stats();
            debug!(task_id, run_id, "task removed from queue");
        }
        removed
    }

    /// Remove every queued task of a run; returns the removed task ids.
    pub fn remove_run(&self, run_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        let mut removed = Vec::new();
        inner.heap.retain(|e| {
            if e.task.run_id == run_id {
                removed.push(e.task.task_id.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            inner.refresh_stats();
        }
        removed
    }

    /// Snapshot of queued entries, best score first (for debugging).
    pub fn list(&self, limit: usize) -> Vec<QueuedTaskInfo> {
        let inner = self.inner.lock().expect("scheduler lock poisoned");
        let mut entries: Vec<_> = inner.heap.iter().collect();
        entries.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(a.enqueue_time.total_cmp(&b.enqueue_time))
        });
        entries
            .into_iter()
            .take(limit)
            .map(|e| QueuedTaskInfo {
                run_id: e.task.run_id.clone(),
                task_id: e.task.task_id.clone(),
                agent: e.task.agent.clone(),
                action: e.task.action.clone(),
                score: e.score,
                enqueue_time: e.enqueue_time,
            })
            .collect()
    }

    /// Drop every queued task.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.heap.clear();
        inner.refresh_stats();
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner
            .lock()
            .expect("scheduler lock poisoned")
            .stats
            .clone()
    }
}
