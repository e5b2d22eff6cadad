//! SLA and deadlock monitor.
//!
//! Periodic scanner over the records store. Flags tasks and workflows that
//! exceed their SLA, and workflows that are nominally running with nothing
//! queued or executing (suspected deadlock). Each violation is announced
//! once; cancellation, when enabled, goes through the coordinator's path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{EngineEvent, SlaConfig, SlaResource, TaskStatus, WorkflowStatus};
use crate::domain::ports::{EventPublisher, TaskRepository, WorkflowRepository};
use crate::services::coordinator::WorkflowCoordinator;

pub struct SlaMonitor {
    runs: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
    events: Arc<dyn EventPublisher>,
    coordinator: Arc<WorkflowCoordinator>,
    config: SlaConfig,
    running: AtomicBool,
    /// Runs already reported as deadlocked (no persistent flag exists for
    /// deadlocks, unlike SLA violations).
    alerted_deadlocks: Mutex<HashSet<String>>,
}

impl SlaMonitor {
    pub fn new(
        runs: Arc<dyn WorkflowRepository>,
        tasks: Arc<dyn TaskRepository>,
        events: Arc<dyn EventPublisher>,
        coordinator: Arc<WorkflowCoordinator>,
        config: SlaConfig,
    ) -> Self {
        Self {
            runs,
            tasks,
            events,
            coordinator,
            config,
            running: AtomicBool::new(false),
            alerted_deadlocks: Mutex::new(HashSet::new()),
        }
    }

    /// Start the background scan loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = Arc::clone(&self);
        let interval = std::time::Duration::from_secs(self.config.monitor_interval_s.max(1));
        tokio::spawn(async move {
            info!(
                interval_s = monitor.config.monitor_interval_s,
                cancel_on_violation = monitor.config.cancel_on_violation,
                "SLA monitor started"
            );
            while monitor.running.load(Ordering::SeqCst) {
                if let Err(e) = monitor.scan_once().await {
                    error!(error = %e, "SLA scan failed");
                }
                tokio::time::sleep(interval).await;
            }
            info!("SLA monitor stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One full scan: stale tasks, stale workflows, deadlocks.
    pub async fn scan_once(&self) -> DomainResult<()> {
        self.scan_stale_tasks().await?;
        self.scan_stale_workflows().await?;
        self.scan_deadlocks().await?;
        Ok(())
    }

    async fn scan_stale_tasks(&self) -> DomainResult<()> {
        let cutoff = Utc::now() - Duration::seconds(self.config.task_sla_s as i64);
        let stale = self
            .tasks
            .list_stale(&[TaskStatus::Queued, TaskStatus::Running], cutoff)
            .await?;

        for mut task in stale {
            let age_s = (Utc::now() - task.sla_reference_time()).num_milliseconds() as f64
                / 1000.0;
            warn!(
                task_id = %task.task_id,
                run_id = %task.run_id,
                status = %task.status,
                age_s,
                sla_s = self.config.task_sla_s,
                "task SLA violation"
            );
            self.emit(EngineEvent::SlaViolation {
                resource: SlaResource::Task,
                run_id: task.run_id.clone(),
                task_id: Some(task.task_id.clone()),
                age_s,
                threshold_s: self.config.task_sla_s,
            })
            .await;

            task.sla_violated_at = Some(Utc::now());
            task.updated_at = Utc::now();
            self.tasks.update(&task).await?;

            if self.config.cancel_on_violation {
                self.cancel(&task.run_id, "task SLA exceeded").await;
            }
        }
        Ok(())
    }

    async fn scan_stale_workflows(&self) -> DomainResult<()> {
        let cutoff = Utc::now() - Duration::seconds(self.config.workflow_sla_s as i64);
        let running = self.runs.list_by_status(&[WorkflowStatus::Running]).await?;

        for mut record in running {
            let reference = record.started_at.unwrap_or(record.created_at);
            if reference >= cutoff || record.sla_violated_at.is_some() {
                continue;
            }
            let age_s = (Utc::now() - reference).num_milliseconds() as f64 / 1000.0;
            warn!(
                run_id = %record.run_id,
                age_s,
                sla_s = self.config.workflow_sla_s,
                "workflow SLA violation"
            );
            self.emit(EngineEvent::SlaViolation {
                resource: SlaResource::Workflow,
                run_id: record.run_id.clone(),
                task_id: None,
                age_s,
                threshold_s: self.config.workflow_sla_s,
            })
            .await;

            record.sla_violated_at = Some(Utc::now());
            record.updated_at = Utc::now();
            self.runs.update(&record).await?;

            if self.config.cancel_on_violation {
                self.cancel(&record.run_id, "workflow SLA exceeded").await;
            }
        }
        Ok(())
    }

    /// A running workflow with no task in `Running`, `Queued`, or `Retry`
    /// and no recent progress is stuck: remaining tasks are blocked on
    /// predecessors that will never complete, or events were lost.
    async fn scan_deadlocks(&self) -> DomainResult<()> {
        let idle_cutoff = Utc::now() - Duration::seconds(self.config.pending_stale_s as i64);
        let running = self.runs.list_by_status(&[WorkflowStatus::Running]).await?;

        for record in running {
            if record.updated_at >= idle_cutoff {
                continue;
            }
            let counts = self.tasks.count_by_status(&record.run_id).await?;
            let active: u64 = [TaskStatus::Running, TaskStatus::Queued, TaskStatus::Retry]
                .iter()
                .filter_map(|s| counts.get(s))
                .sum();
            if active > 0 {
                continue;
            }
            {
                let mut alerted = self
                    .alerted_deadlocks
                    .lock()
                    .expect("deadlock set poisoned");
                if !alerted.insert(record.run_id.clone()) {
                    continue;
                }
            }

            let age_s =
                (Utc::now() - record.updated_at).num_milliseconds() as f64 / 1000.0;
            warn!(
                run_id = %record.run_id,
                idle_s = age_s,
                "suspected deadlock: workflow running with no active tasks"
            );
            self.emit(EngineEvent::SlaViolation {
                resource: SlaResource::Deadlock,
                run_id: record.run_id.clone(),
                task_id: None,
                age_s,
                threshold_s: self.config.pending_stale_s,
            })
            .await;

            if self.config.cancel_on_violation {
                self.cancel(&record.run_id, "suspected deadlock").await;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "SLA alert lost");
        }
    }

    async fn cancel(&self, run_id: &str, reason: &str) {
        match self
            .coordinator
            .cancel_workflow(run_id, reason, false, "sla_monitor")
            .await
        {
            Ok(true) => info!(run_id, reason, "workflow cancelled by SLA monitor"),
            Ok(false) => debug!(run_id, "SLA cancellation skipped (already terminal)"),
            Err(e) => error!(run_id, error = %e, "SLA cancellation failed"),
        }
    }
}
