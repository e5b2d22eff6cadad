//! Per-agent worker pools.
//!
//! Each enabled agent gets one pool of bounded size. Workers poll the
//! shared scheduler filtered on their agent, call the agent over HTTP, and
//! report outcomes to the coordinator through the [`TaskEventSink`] seam.
//! Workers never write task state themselves.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainResult, FailureKind};
use crate::domain::models::{TaskRecord, WorkerConfig};
use crate::domain::ports::{
    AgentCallError, AgentClient, AgentRequest, CancellationSet, RuntimeEstimateStore,
};
use crate::services::scheduler::PriorityScheduler;

/// Where workers report task outcomes.
///
/// Implemented by the coordinator, which owns all task state transitions.
/// A sink error on `task_started` means the task must not be executed
/// (typically it was cancelled between dequeue and start).
#[async_trait]
pub trait TaskEventSink: Send + Sync {
    async fn task_started(&self, task: &TaskRecord) -> DomainResult<()>;

    async fn task_succeeded(
        &self,
        task: &TaskRecord,
        result: serde_json::Value,
        runtime_s: f64,
    ) -> DomainResult<()>;

    async fn task_failed(
        &self,
        task: &TaskRecord,
        error: String,
        kind: FailureKind,
    ) -> DomainResult<()>;

    async fn task_cancelled(&self, task: &TaskRecord, reason: &str) -> DomainResult<()>;
}

/// Statistics for one worker slot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub tasks_executed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_runtime_s: f64,
    pub is_active: bool,
}

/// Aggregated view over one agent's pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub agent: String,
    pub max_workers: usize,
    pub active_workers: usize,
    pub tasks_executed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_runtime_s: f64,
}

/// Bounded pool of workers for a single agent.
pub struct AgentWorkerPool {
    agent: String,
    base_url: String,
    max_workers: usize,
    poll_interval: std::time::Duration,
    scheduler: Arc<PriorityScheduler>,
    sink: Arc<dyn TaskEventSink>,
    cancellations: Arc<dyn CancellationSet>,
    estimates: Arc<dyn RuntimeEstimateStore>,
    client: Arc<dyn AgentClient>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
    running: Arc<AtomicBool>,
    worker_stats: Arc<Mutex<Vec<WorkerStats>>>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AgentWorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: String,
        config: &WorkerConfig,
        scheduler: Arc<PriorityScheduler>,
        sink: Arc<dyn TaskEventSink>,
        cancellations: Arc<dyn CancellationSet>,
        estimates: Arc<dyn RuntimeEstimateStore>,
        client: Arc<dyn AgentClient>,
    ) -> Self {
        let max_workers = config.max_workers(&agent);
        let rate_limiter = config
            .rate_limit_per_agent
            .get(&agent)
            .and_then(|rps| NonZeroU32::new(*rps))
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        info!(
            agent = %agent,
            max_workers,
            url = %config.agent_url(&agent),
            rate_limited = rate_limiter.is_some(),
            "worker pool initialized"
        );

        Self {
            base_url: config.agent_url(&agent),
            max_workers,
            poll_interval: std::time::Duration::from_millis(config.poll_interval_ms.max(1)),
            agent,
            scheduler,
            sink,
            cancellations,
            estimates,
            client,
            rate_limiter,
            running: Arc::new(AtomicBool::new(false)),
            worker_stats: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Spawn all workers for this pool.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(agent = %self.agent, "worker pool already running");
            return;
        }

        {
            let mut stats = self.worker_stats.lock().expect("worker stats poisoned");
            stats.clear();
            stats.resize_with(self.max_workers, WorkerStats::default);
        }

        let mut handles = self.handles.lock().expect("worker handles poisoned");
        for worker_id in 0..self.max_workers {
            let pool = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id).await;
            }));
        }
        info!(agent = %self.agent, workers = self.max_workers, "worker pool started");
    }

    /// Signal workers to stop and wait for them to drain.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().expect("worker handles poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!(agent = %self.agent, "worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(agent = %self.agent, worker_id, "worker started");
        while self.running.load(Ordering::SeqCst) {
            match self.scheduler.dequeue(Some(&self.agent)) {
                Some(task) => {
                    self.set_active(worker_id, true);
                    self.execute_task(task, worker_id).await;
                    self.set_active(worker_id, false);
                }
                None => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        debug!(agent = %self.agent, worker_id, "worker stopped");
    }

    async fn execute_task(&self, task: TaskRecord, worker_id: usize) {
        // Fence before doing anything: the run may have been cancelled while
        // this task sat in the queue.
        if self.cancellations.contains(&task.run_id).await {
            debug!(
                task_id = %task.task_id,
                run_id = %task.run_id,
                "skipping task of cancelled run"
            );
            self.report_cancelled(&task, "workflow cancelled").await;
            return;
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        if let Err(e) = self.sink.task_started(&task).await {
            // The coordinator refused the start; the task is no longer ours.
            warn!(
                task_id = %task.task_id,
                run_id = %task.run_id,
                error = %e,
                "task start rejected"
            );
            return;
        }

        let request = AgentRequest {
            task_id: task.task_id.clone(),
            action: task.action.clone(),
            params: task.params.clone(),
            run_id: task.run_id.clone(),
            metadata: serde_json::Value::Null,
        };

        info!(
            agent = %self.agent,
            worker_id,
            task_id = %task.task_id,
            run_id = %task.run_id,
            action = %task.action,
            "executing task"
        );
        let start = Instant::now();
        let outcome = self.client.execute(&self.base_url, &request).await;
        let runtime_s = start.elapsed().as_secs_f64();

        // Fence again: a cancellation that landed mid-call discards the
        // result, whatever it was.
        if self.cancellations.contains(&task.run_id).await {
            info!(
                task_id = %task.task_id,
                run_id = %task.run_id,
                "run cancelled mid-flight, discarding result"
            );
            self.record_outcome(worker_id, runtime_s, false);
            self.report_cancelled(&task, "workflow cancelled while task in flight")
                .await;
            return;
        }

        match outcome {
            Ok(result) => {
                self.estimates
                    .observe(&self.agent, &task.action, runtime_s)
                    .await;
                self.record_outcome(worker_id, runtime_s, true);
                info!(
                    task_id = %task.task_id,
                    run_id = %task.run_id,
                    runtime_s,
                    "task succeeded"
                );
                if let Err(e) = self.sink.task_succeeded(&task, result, runtime_s).await {
                    error!(task_id = %task.task_id, error = %e, "failed to report task success");
                }
            }
            Err(call_error) => {
                let kind = classify_agent_error(&call_error);
                self.record_outcome(worker_id, runtime_s, false);
                warn!(
                    task_id = %task.task_id,
                    run_id = %task.run_id,
                    kind = %kind,
                    error = %call_error,
                    "task failed"
                );
                if let Err(e) = self
                    .sink
                    .task_failed(&task, call_error.to_string(), kind)
                    .await
                {
                    error!(task_id = %task.task_id, error = %e, "failed to report task failure");
                }
            }
        }
    }

    async fn report_cancelled(&self, task: &TaskRecord, reason: &str) {
        if let Err(e) = self.sink.task_cancelled(task, reason).await {
            error!(task_id = %task.task_id, error = %e, "failed to report task cancellation");
        }
    }

    fn set_active(&self, worker_id: usize, active: bool) {
        if let Some(stats) = self
            .worker_stats
            .lock()
            .expect("worker stats poisoned")
            .get_mut(worker_id)
        {
            stats.is_active = active;
        }
    }

    fn record_outcome(&self, worker_id: usize, runtime_s: f64, succeeded: bool) {
        if let Some(stats) = self
            .worker_stats
            .lock()
            .expect("worker stats poisoned")
            .get_mut(worker_id)
        {
            stats.tasks_executed += 1;
            stats.total_runtime_s += runtime_s;
            if succeeded {
                stats.tasks_succeeded += 1;
            } else {
                stats.tasks_failed += 1;
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let workers = self.worker_stats.lock().expect("worker stats poisoned");
        PoolStats {
            agent: self.agent.clone(),
            max_workers: self.max_workers,
            active_workers: workers.iter().filter(|w| w.is_active).count(),
            tasks_executed: workers.iter().map(|w| w.tasks_executed).sum(),
            tasks_succeeded: workers.iter().map(|w| w.tasks_succeeded).sum(),
            tasks_failed: workers.iter().map(|w| w.tasks_failed).sum(),
            total_runtime_s: workers.iter().map(|w| w.total_runtime_s).sum(),
        }
    }
}

/// Map an outbound call error onto the failure taxonomy.
fn classify_agent_error(error: &AgentCallError) -> FailureKind {
    if error.is_transient() {
        FailureKind::Transient
    } else {
        FailureKind::Validation
    }
}

/// Worker pools for every enabled agent.
pub struct WorkerManager {
    pools: HashMap<String, Arc<AgentWorkerPool>>,
}

impl WorkerManager {
    pub fn new(
        config: &WorkerConfig,
        scheduler: Arc<PriorityScheduler>,
        sink: Arc<dyn TaskEventSink>,
        cancellations: Arc<dyn CancellationSet>,
        estimates: Arc<dyn RuntimeEstimateStore>,
        client: Arc<dyn AgentClient>,
    ) -> Self {
        let pools = config
            .enabled_agents
            .iter()
            .map(|agent| {
                let pool = Arc::new(AgentWorkerPool::new(
                    agent.clone(),
                    config,
                    Arc::clone(&scheduler),
                    Arc::clone(&sink),
                    Arc::clone(&cancellations),
                    Arc::clone(&estimates),
                    Arc::clone(&client),
                ));
                (agent.clone(), pool)
            })
            .collect();
        Self { pools }
    }

    pub fn start_all(&self) {
        for pool in self.pools.values() {
            Arc::clone(pool).start();
        }
    }

    pub async fn stop_all(&self) {
        for pool in self.pools.values() {
            pool.stop().await;
        }
    }

    pub fn pool(&self, agent: &str) -> Option<&Arc<AgentWorkerPool>> {
        self.pools.get(agent)
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<_> = self.pools.values().map(|p| p.stats()).collect();
        stats.sort_by(|a, b| a.agent.cmp(&b.agent));
        stats
    }
}
