//! Workflow coordinator.
//!
//! Drives the task state machine: materializes workflows, enqueues ready
//! tasks as predecessors complete, evaluates terminal state, and owns the
//! single authoritative cancellation path. Workers report outcomes through
//! [`TaskEventSink`]; the coordinator is the sole writer of task status.
//!
//! Events for one run are serialized behind a per-run lock so counter and
//! in-degree updates stay consistent; runs proceed independently of each
//! other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, FailureKind};
use crate::domain::models::{
    CancellationInfo, EngineEvent, TaskRecord, TaskStatus, WorkflowDefinition, WorkflowRecord,
    WorkflowStatus, WorkflowStatusReport, WorkflowSummary,
};
use crate::domain::ports::{
    CancellationSet, EventPublisher, TaskRepository, WorkflowRepository,
};
use crate::services::agent_registry::AgentRegistry;
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::retry_tracker::RetryTracker;
use crate::services::scheduler::PriorityScheduler;
use crate::services::worker_pool::TaskEventSink;

pub struct WorkflowCoordinator {
    runs: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
    scheduler: Arc<PriorityScheduler>,
    retry_tracker: Arc<RetryTracker>,
    cancellations: Arc<dyn CancellationSet>,
    events: Arc<dyn EventPublisher>,
    registry: AgentRegistry,
    resolver: DependencyResolver,
    run_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runs: Arc<dyn WorkflowRepository>,
        tasks: Arc<dyn TaskRepository>,
        scheduler: Arc<PriorityScheduler>,
        retry_tracker: Arc<RetryTracker>,
        cancellations: Arc<dyn CancellationSet>,
        events: Arc<dyn EventPublisher>,
        registry: AgentRegistry,
    ) -> Self {
        Self {
            runs,
            tasks,
            scheduler,
            retry_tracker,
            cancellations,
            events,
            registry,
            resolver: DependencyResolver::new(),
            run_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Per-run serialization lock.
    async fn run_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        Arc::clone(
            locks
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn publish(&self, event: EngineEvent) {
        // The publisher already retries; a final failure is logged there and
        // must not stall workflow progress.
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "event lost");
        }
    }

    /// Validate a definition and materialize its records.
    ///
    /// The workflow is created in `Pending`; nothing is scheduled until
    /// [`start_workflow`](Self::start_workflow).
    #[instrument(skip(self, definition, metadata), err)]
    pub async fn init_workflow(
        &self,
        definition: WorkflowDefinition,
        metadata: serde_json::Value,
        client_id: Option<String>,
    ) -> DomainResult<String> {
        definition.validate()?;

        let registry_errors = self.registry.validate_tasks(&definition.tasks);
        if !registry_errors.is_empty() {
            return Err(DomainError::InvalidDefinition(registry_errors.join("; ")));
        }

        self.resolver.validate(&definition.tasks)?;

        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let task_records: Vec<TaskRecord> = definition
            .tasks
            .iter()
            .map(|def| TaskRecord::from_definition(&run_id, def))
            .collect();
        let record = WorkflowRecord::new(run_id.clone(), definition, metadata, client_id);

        self.runs.create(&record).await?;
        self.tasks.create_many(&task_records).await?;

        info!(
            run_id = %run_id,
            task_count = task_records.len(),
            "workflow initialized"
        );
        Ok(run_id)
    }

    /// Transition a pending workflow to running and enqueue its roots.
    #[instrument(skip(self), err)]
    pub async fn start_workflow(&self, run_id: &str) -> DomainResult<bool> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut record = self.fetch_run(run_id).await?;
        if record.status.is_terminal() {
            return Err(DomainError::AlreadyTerminal {
                run_id: run_id.to_string(),
                status: record.status.to_string(),
            });
        }
        if record.status != WorkflowStatus::Pending {
            debug!(run_id, status = %record.status, "start ignored");
            return Ok(false);
        }

        record.status = WorkflowStatus::Running;
        record.started_at = Some(Utc::now());
        record.updated_at = Utc::now();
        self.runs.update(&record).await?;

        self.publish(EngineEvent::WorkflowStarted {
            run_id: run_id.to_string(),
        })
        .await;

        let mut enqueued = 0usize;
        for task in self.tasks.list_by_run(run_id).await? {
            if task.in_degree == 0 && task.status == TaskStatus::Pending {
                self.enqueue_task(task).await?;
                enqueued += 1;
            }
        }
        info!(run_id, enqueued, "workflow started");
        Ok(true)
    }

    /// Flip a task to queued and push it into the scheduler.
    ///
    /// Callers must hold the run lock.
    async fn enqueue_task(&self, mut task: TaskRecord) -> DomainResult<()> {
        task.status = TaskStatus::Queued;
        task.queued_at = Some(Utc::now());
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        self.scheduler.enqueue(task).await;
        Ok(())
    }

    async fn fetch_run(&self, run_id: &str) -> DomainResult<WorkflowRecord> {
        self.runs
            .get(run_id)
            .await?
            .ok_or_else(|| DomainError::WorkflowNotFound(run_id.to_string()))
    }

    async fn fetch_task(&self, run_id: &str, task_id: &str) -> DomainResult<TaskRecord> {
        self.tasks
            .get(run_id, task_id)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound {
                run_id: run_id.to_string(),
                task_id: task_id.to_string(),
            })
    }

    /// A state the machine forbids was observed: log loudly and fail the
    /// workflow with an explicit diagnostic. Callers hold the run lock.
    async fn invariant_violation(&self, run_id: &str, diagnostic: &str) {
        error!(run_id, diagnostic, "coordinator invariant violation");
        match self.runs.get(run_id).await {
            Ok(Some(mut record)) if !record.status.is_terminal() => {
                record.status = WorkflowStatus::Failed;
                record.finished_at = Some(Utc::now());
                record.updated_at = Utc::now();
                if record.metadata.is_null() {
                    record.metadata = serde_json::json!({});
                }
                if let serde_json::Value::Object(map) = &mut record.metadata {
                    map.insert(
                        "invariant_violation".to_string(),
                        serde_json::Value::String(diagnostic.to_string()),
                    );
                }
                if let Err(e) = self.runs.update(&record).await {
                    error!(run_id, error = %e, "failed to record invariant violation");
                }
                self.publish(EngineEvent::WorkflowFailed {
                    run_id: run_id.to_string(),
                    counters: record.counters,
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => error!(run_id, error = %e, "failed to load run for invariant violation"),
        }
    }

    /// Cancel a task record in place and announce it. Run lock held.
    async fn cancel_task_record(&self, mut task: TaskRecord, reason: &str) -> DomainResult<()> {
        task.status = TaskStatus::Cancelled;
        task.finished_at = Some(Utc::now());
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        self.publish(EngineEvent::TaskCancelled {
            run_id: task.run_id.clone(),
            task_id: task.task_id.clone(),
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    /// Drain tasks that have not reached a worker yet: remove them from the
    /// scheduler queue and the delay queue, mark them cancelled. Run lock held.
    async fn drain_pending_work(&self, run_id: &str, reason: &str) -> DomainResult<usize> {
        let draining = self
            .tasks
            .list_by_run_and_status(
                run_id,
                &[TaskStatus::Pending, TaskStatus::Queued, TaskStatus::Retry],
            )
            .await?;

        let count = draining.len();
        for task in draining {
            match task.status {
                TaskStatus::Queued => {
                    self.scheduler.remove(run_id, &task.task_id);
                }
                TaskStatus::Retry => {
                    self.retry_tracker.cancel_retry(run_id, &task.task_id).await?;
                }
                _ => {}
            }
            self.cancel_task_record(task, reason).await?;
        }
        Ok(count)
    }

    /// Settle a cancelling workflow once nothing is running anymore.
    /// Run lock held.
    async fn settle_cancellation(&self, run_id: &str) -> DomainResult<()> {
        let mut record = self.fetch_run(run_id).await?;
        if record.status != WorkflowStatus::Cancelling {
            return Ok(());
        }
        let running = self
            .tasks
            .list_by_run_and_status(run_id, &[TaskStatus::Running])
            .await?;
        if running.is_empty() {
            record.status = WorkflowStatus::Cancelled;
            record.finished_at = Some(Utc::now());
            record.updated_at = Utc::now();
            self.runs.update(&record).await?;
            info!(run_id, "cancellation settled");
        }
        Ok(())
    }

    /// Terminal failure path: fail the workflow, fence the run, cancel every
    /// non-terminal sibling. Run lock held.
    async fn fail_workflow(&self, mut record: WorkflowRecord) -> DomainResult<()> {
        let run_id = record.run_id.clone();
        record.status = WorkflowStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.updated_at = Utc::now();
        self.runs.update(&record).await?;

        self.publish(EngineEvent::WorkflowFailed {
            run_id: run_id.clone(),
            counters: record.counters,
        })
        .await;

        // Fence in-flight siblings, then drain everything that has not
        // reached a worker.
        self.cancellations.add(&run_id).await;
        let drained = self.drain_pending_work(&run_id, "workflow failed").await?;
        warn!(run_id = %run_id, drained, "workflow failed, siblings cancelled");
        Ok(())
    }

    /// Graceful cancellation: record intent, drain pending work, fence
    /// in-flight work. Idempotent; the second concurrent call is a no-op.
    #[instrument(skip(self), err)]
    pub async fn cancel_workflow(
        &self,
        run_id: &str,
        reason: &str,
        force: bool,
        cancelled_by: &str,
    ) -> DomainResult<bool> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut record = self.fetch_run(run_id).await?;
        if record.status.is_terminal() {
            info!(run_id, status = %record.status, "cancel rejected, already terminal");
            return Ok(false);
        }
        if record.status == WorkflowStatus::Cancelling && !force {
            debug!(run_id, "cancellation already in progress");
            return Ok(false);
        }

        if record.status != WorkflowStatus::Cancelling {
            record.status = WorkflowStatus::Cancelling;
            record.cancellation = Some(CancellationInfo {
                reason: reason.to_string(),
                cancelled_by: cancelled_by.to_string(),
                cancelled_at: Utc::now(),
            });
            record.updated_at = Utc::now();
            self.runs.update(&record).await?;

            self.publish(EngineEvent::WorkflowCancellationInitiated {
                run_id: run_id.to_string(),
                reason: reason.to_string(),
                cancelled_by: cancelled_by.to_string(),
            })
            .await;
        }

        let drained = self.drain_pending_work(run_id, reason).await?;
        self.cancellations.add(run_id).await;

        if force {
            for task in self
                .tasks
                .list_by_run_and_status(run_id, &[TaskStatus::Running])
                .await?
            {
                self.cancel_task_record(task, reason).await?;
            }
        }

        self.settle_cancellation(run_id).await?;
        info!(run_id, drained, force, "workflow cancellation initiated");
        Ok(true)
    }

    /// Force a stuck `Cancelling` workflow to `Cancelled`, cancelling any
    /// still-running tasks unconditionally.
    #[instrument(skip(self), err)]
    pub async fn force_complete_cancellation(&self, run_id: &str) -> DomainResult<bool> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut record = self.fetch_run(run_id).await?;
        if record.status != WorkflowStatus::Cancelling {
            return Ok(false);
        }

        for task in self
            .tasks
            .list_by_run_and_status(run_id, &[TaskStatus::Running])
            .await?
        {
            self.cancel_task_record(task, "cancellation force completed")
                .await?;
        }

        record.status = WorkflowStatus::Cancelled;
        record.finished_at = Some(Utc::now());
        record.updated_at = Utc::now();
        self.runs.update(&record).await?;
        info!(run_id, "cancellation force completed");
        Ok(true)
    }

    /// Status + counters + cancellation metadata + task counts by status.
    pub async fn get_workflow_status(
        &self,
        run_id: &str,
    ) -> DomainResult<Option<WorkflowStatusReport>> {
        let Some(record) = self.runs.get(run_id).await? else {
            return Ok(None);
        };
        let task_counts = self.tasks.count_by_status(run_id).await?;
        Ok(Some(WorkflowStatusReport {
            run_id: record.run_id.clone(),
            name: record.name().map(ToString::to_string),
            status: record.status,
            counters: record.counters,
            cancellation: record.cancellation.clone(),
            task_counts,
            client_id: record.client_id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    /// All task records of a run (diagnostic view).
    pub async fn list_tasks(&self, run_id: &str) -> DomainResult<Vec<TaskRecord>> {
        self.tasks.list_by_run(run_id).await
    }

    /// Cancelled / cancelling workflows, newest first.
    pub async fn list_cancelled(
        &self,
        limit: usize,
        offset: usize,
        client_id: Option<&str>,
    ) -> DomainResult<Vec<WorkflowSummary>> {
        Ok(self
            .runs
            .list_cancelled(limit, offset, client_id)
            .await?
            .iter()
            .map(WorkflowSummary::from)
            .collect())
    }
}

#[async_trait]
impl TaskEventSink for WorkflowCoordinator {
    async fn task_started(&self, task: &TaskRecord) -> DomainResult<()> {
        let lock = self.run_lock(&task.run_id).await;
        let _guard = lock.lock().await;

        let mut fresh = self.fetch_task(&task.run_id, &task.task_id).await?;
        match fresh.status {
            TaskStatus::Cancelled => Err(DomainError::InvalidTransition {
                task_id: fresh.task_id.clone(),
                from: fresh.status.to_string(),
                to: TaskStatus::Running.to_string(),
            }),
            status if status.can_transition_to(TaskStatus::Running) => {
                fresh.status = TaskStatus::Running;
                fresh.started_at = Some(Utc::now());
                fresh.updated_at = Utc::now();
                self.tasks.update(&fresh).await?;
                self.publish(EngineEvent::TaskStarted {
                    run_id: fresh.run_id.clone(),
                    task_id: fresh.task_id.clone(),
                    agent: fresh.agent.clone(),
                    action: fresh.action.clone(),
                    attempt: fresh.retries + 1,
                })
                .await;
                Ok(())
            }
            status => {
                self.invariant_violation(
                    &task.run_id,
                    &format!(
                        "task {} reported started while {status} (double dequeue?)",
                        task.task_id
                    ),
                )
                .await;
                Err(DomainError::InvalidTransition {
                    task_id: fresh.task_id.clone(),
                    from: status.to_string(),
                    to: TaskStatus::Running.to_string(),
                })
            }
        }
    }

    async fn task_succeeded(
        &self,
        task: &TaskRecord,
        result: serde_json::Value,
        runtime_s: f64,
    ) -> DomainResult<()> {
        let lock = self.run_lock(&task.run_id).await;
        let _guard = lock.lock().await;

        let mut fresh = self.fetch_task(&task.run_id, &task.task_id).await?;
        if fresh.status == TaskStatus::Cancelled {
            debug!(task_id = %fresh.task_id, "success for already-cancelled task ignored");
            return Ok(());
        }

        let mut record = self.fetch_run(&task.run_id).await?;
        if matches!(
            record.status,
            WorkflowStatus::Cancelling | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        ) {
            // Raced with cancellation or a sibling's terminal failure after
            // the worker's fence check; the result is discarded either way.
            self.cancel_task_record(fresh, "workflow no longer running")
                .await?;
            return self.settle_cancellation(&task.run_id).await;
        }

        if fresh.status != TaskStatus::Running {
            self.invariant_violation(
                &task.run_id,
                &format!(
                    "task {} reported success while {}",
                    task.task_id, fresh.status
                ),
            )
            .await;
            return Ok(());
        }

        fresh.status = TaskStatus::Completed;
        fresh.finished_at = Some(Utc::now());
        fresh.updated_at = Utc::now();
        fresh.result = Some(result.clone());
        self.tasks.update(&fresh).await?;

        record.counters.completed_tasks += 1;
        record.updated_at = Utc::now();
        self.runs.update(&record).await?;

        self.publish(EngineEvent::TaskSuccess {
            run_id: fresh.run_id.clone(),
            task_id: fresh.task_id.clone(),
            agent: fresh.agent.clone(),
            action: fresh.action.clone(),
            runtime_s,
            result,
        })
        .await;

        // Unblock successors: decrement in-degree atomically with the
        // enqueue-if-zero step (both under the run lock).
        for successor in self.tasks.list_by_run(&task.run_id).await? {
            if successor.status != TaskStatus::Pending
                || !successor.depends_on.iter().any(|d| d == &task.task_id)
            {
                continue;
            }
            let mut successor = successor;
            successor.in_degree = successor.in_degree.saturating_sub(1);
            successor.updated_at = Utc::now();
            if successor.in_degree == 0 {
                self.enqueue_task(successor).await?;
            } else {
                self.tasks.update(&successor).await?;
            }
        }

        if record.counters.completed_tasks >= record.counters.total_tasks {
            record.status = WorkflowStatus::Completed;
            record.finished_at = Some(Utc::now());
            record.updated_at = Utc::now();
            self.runs.update(&record).await?;
            self.publish(EngineEvent::WorkflowCompleted {
                run_id: record.run_id.clone(),
                counters: record.counters,
            })
            .await;
            info!(run_id = %record.run_id, "workflow completed");
        }
        Ok(())
    }

    async fn task_failed(
        &self,
        task: &TaskRecord,
        error: String,
        kind: FailureKind,
    ) -> DomainResult<()> {
        let lock = self.run_lock(&task.run_id).await;
        let _guard = lock.lock().await;

        let mut fresh = self.fetch_task(&task.run_id, &task.task_id).await?;
        if fresh.status == TaskStatus::Cancelled {
            return Ok(());
        }

        let mut record = self.fetch_run(&task.run_id).await?;
        if matches!(
            record.status,
            WorkflowStatus::Cancelling | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        ) {
            self.cancel_task_record(fresh, "workflow no longer running")
                .await?;
            return self.settle_cancellation(&task.run_id).await;
        }

        if fresh.status != TaskStatus::Running {
            self.invariant_violation(
                &task.run_id,
                &format!(
                    "task {} reported failure while {}",
                    task.task_id, fresh.status
                ),
            )
            .await;
            return Ok(());
        }

        if kind.is_retriable() && self.retry_tracker.schedule(&mut fresh, &error).await? {
            self.publish(EngineEvent::TaskFailed {
                run_id: fresh.run_id.clone(),
                task_id: fresh.task_id.clone(),
                agent: fresh.agent.clone(),
                action: fresh.action.clone(),
                error,
                kind,
                retries: fresh.retries,
                will_retry: true,
            })
            .await;
            return Ok(());
        }

        // Terminal failure: either non-retriable or the budget is spent.
        let final_kind = if kind.is_retriable() {
            FailureKind::Exhausted
        } else {
            kind
        };

        fresh.status = TaskStatus::Failed;
        fresh.last_error = Some(error.clone());
        fresh.finished_at = Some(Utc::now());
        fresh.updated_at = Utc::now();
        self.tasks.update(&fresh).await?;

        record.counters.failed_tasks += 1;
        record.updated_at = Utc::now();
        self.runs.update(&record).await?;

        self.publish(EngineEvent::TaskFailed {
            run_id: fresh.run_id.clone(),
            task_id: fresh.task_id.clone(),
            agent: fresh.agent.clone(),
            action: fresh.action.clone(),
            error,
            kind: final_kind,
            retries: fresh.retries,
            will_retry: false,
        })
        .await;

        self.fail_workflow(record).await
    }

    async fn task_cancelled(&self, task: &TaskRecord, reason: &str) -> DomainResult<()> {
        let lock = self.run_lock(&task.run_id).await;
        let _guard = lock.lock().await;

        let fresh = self.fetch_task(&task.run_id, &task.task_id).await?;
        if fresh.status.is_terminal() {
            return Ok(());
        }
        self.cancel_task_record(fresh, reason).await?;
        self.settle_cancellation(&task.run_id).await
    }
}
