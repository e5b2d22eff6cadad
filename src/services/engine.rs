//! Engine composition root.
//!
//! One `Engine` value owns the scheduler, retry tracker, worker manager,
//! coordinator, and monitor, constructed once from configuration. Stores
//! default to the durable SQLite implementation and fall back to in-memory
//! when the database cannot be opened.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::models::{
    EngineConfig, EngineEvent, EventEnvelope, TaskRecord, WorkflowDefinition,
    WorkflowStatusReport, WorkflowSummary,
};
use crate::domain::ports::{
    AgentClient, CancellationSet, DelayQueue, EventPublisher, RuntimeEstimateStore,
    TaskRepository, WorkflowRepository,
};
use crate::infrastructure::agent::HttpAgentClient;
use crate::infrastructure::database::{
    DatabaseConnection, SqliteTaskRepository, SqliteWorkflowRepository,
};
use crate::infrastructure::memory::{
    InMemoryCancellationSet, InMemoryDelayQueue, InMemoryEstimateStore, InMemoryTaskRepository,
    InMemoryWorkflowRepository,
};
use crate::services::agent_registry::AgentRegistry;
use crate::services::coordinator::WorkflowCoordinator;
use crate::services::event_bus::{EventBus, RetryingPublisher};
use crate::services::retry_tracker::{RetryTracker, RetryTrackerStats};
use crate::services::scheduler::{PriorityScheduler, SchedulerStats};
use crate::services::sla_monitor::SlaMonitor;
use crate::services::worker_pool::{PoolStats, TaskEventSink, WorkerManager};

/// Aggregated engine diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub scheduler: SchedulerStats,
    pub retry: RetryTrackerStats,
    pub pools: Vec<PoolStats>,
    pub pending_retries: usize,
}

/// Builder for assembling an engine with custom port implementations.
///
/// Anything not supplied defaults to the in-memory implementation (and the
/// real HTTP agent client); tests swap in scripted agents here.
pub struct EngineBuilder {
    config: EngineConfig,
    runs: Option<Arc<dyn WorkflowRepository>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    delay_queue: Option<Arc<dyn DelayQueue>>,
    estimates: Option<Arc<dyn RuntimeEstimateStore>>,
    cancellations: Option<Arc<dyn CancellationSet>>,
    agent_client: Option<Arc<dyn AgentClient>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            runs: None,
            tasks: None,
            delay_queue: None,
            estimates: None,
            cancellations: None,
            agent_client: None,
        }
    }

    pub fn workflow_repository(mut self, runs: Arc<dyn WorkflowRepository>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn task_repository(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn delay_queue(mut self, queue: Arc<dyn DelayQueue>) -> Self {
        self.delay_queue = Some(queue);
        self
    }

    pub fn estimate_store(mut self, estimates: Arc<dyn RuntimeEstimateStore>) -> Self {
        self.estimates = Some(estimates);
        self
    }

    pub fn cancellation_set(mut self, cancellations: Arc<dyn CancellationSet>) -> Self {
        self.cancellations = Some(cancellations);
        self
    }

    pub fn agent_client(mut self, client: Arc<dyn AgentClient>) -> Self {
        self.agent_client = Some(client);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;

        let runs = self
            .runs
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowRepository::new()));
        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(InMemoryTaskRepository::new()));
        let delay_queue = self
            .delay_queue
            .unwrap_or_else(|| Arc::new(InMemoryDelayQueue::new()));
        let estimates = self
            .estimates
            .unwrap_or_else(|| Arc::new(InMemoryEstimateStore::new()));
        let cancellations = self
            .cancellations
            .unwrap_or_else(|| Arc::new(InMemoryCancellationSet::new(config.cancellation_ttl_s)));
        let agent_client: Arc<dyn AgentClient> = match self.agent_client {
            Some(client) => client,
            None => Arc::new(
                HttpAgentClient::new(config.worker.task_timeout_s)
                    .map_err(|e| anyhow::anyhow!("failed to build agent client: {e}"))?,
            ),
        };

        let event_bus = Arc::new(EventBus::new(config.event_capacity));
        let publisher: Arc<dyn EventPublisher> = Arc::new(RetryingPublisher::new(
            event_bus.clone(),
            std::time::Duration::from_secs(5),
        ));

        let scheduler = Arc::new(PriorityScheduler::new(
            &config.scheduler,
            Arc::clone(&estimates),
        ));
        let retry_tracker = Arc::new(RetryTracker::new(
            Arc::clone(&scheduler),
            Arc::clone(&tasks),
            Arc::clone(&delay_queue),
            config.retry.clone(),
        ));
        let registry = AgentRegistry::from_config(&config);
        let coordinator = Arc::new(WorkflowCoordinator::new(
            Arc::clone(&runs),
            Arc::clone(&tasks),
            Arc::clone(&scheduler),
            Arc::clone(&retry_tracker),
            Arc::clone(&cancellations),
            Arc::clone(&publisher),
            registry,
        ));

        let sink: Arc<dyn TaskEventSink> = coordinator.clone();
        let worker_manager = Arc::new(WorkerManager::new(
            &config.worker,
            Arc::clone(&scheduler),
            sink,
            Arc::clone(&cancellations),
            Arc::clone(&estimates),
            agent_client,
        ));

        let monitor = Arc::new(SlaMonitor::new(
            runs,
            tasks,
            publisher,
            Arc::clone(&coordinator),
            config.sla.clone(),
        ));

        Ok(Engine {
            config,
            coordinator,
            scheduler,
            retry_tracker,
            worker_manager,
            monitor,
            event_bus,
            background: Mutex::new(Vec::new()),
        })
    }
}

/// The workflow orchestration engine.
pub struct Engine {
    config: EngineConfig,
    coordinator: Arc<WorkflowCoordinator>,
    scheduler: Arc<PriorityScheduler>,
    retry_tracker: Arc<RetryTracker>,
    worker_manager: Arc<WorkerManager>,
    monitor: Arc<SlaMonitor>,
    event_bus: Arc<EventBus>,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build an engine from configuration.
    ///
    /// Opens the SQLite records store at `database.path`; if the database is
    /// unreachable the engine continues on the in-memory store, losing
    /// durability but not correctness. An empty path selects the in-memory
    /// store outright.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        let mut builder = Self::builder(config.clone());

        if !config.database.path.is_empty() {
            match Self::open_database(&config).await {
                Ok((runs, tasks)) => {
                    builder = builder.workflow_repository(runs).task_repository(tasks);
                }
                Err(e) => {
                    warn!(
                        path = %config.database.path,
                        error = %e,
                        "database unavailable, falling back to in-memory store"
                    );
                }
            }
        }

        builder.build()
    }

    async fn open_database(
        config: &EngineConfig,
    ) -> Result<(Arc<dyn WorkflowRepository>, Arc<dyn TaskRepository>)> {
        let path = std::path::Path::new(&config.database.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let url = format!("sqlite:{}", config.database.path);
        let connection =
            DatabaseConnection::new(&url, config.database.max_connections).await?;
        connection.migrate().await?;

        let pool = connection.pool();
        Ok((
            Arc::new(SqliteWorkflowRepository::new(pool.clone())),
            Arc::new(SqliteTaskRepository::new(pool)),
        ))
    }

    /// Start background machinery: retry poller, worker pools, SLA monitor.
    pub fn start(&self) {
        let mut background = self.background.lock().expect("background handles poisoned");
        background.push(Arc::clone(&self.retry_tracker).start());
        background.push(Arc::clone(&self.monitor).start());
        self.worker_manager.start_all();
        info!("engine started");
    }

    /// Graceful shutdown: stop accepting work, drain workers.
    pub async fn shutdown(&self) {
        self.monitor.stop();
        self.retry_tracker.stop();
        self.worker_manager.stop_all().await;
        let handles: Vec<_> = {
            let mut background = self.background.lock().expect("background handles poisoned");
            background.drain(..).collect()
        };
        for handle in handles {
            // Pollers observe their stop flag only after the current sleep;
            // aborting skips that wait.
            handle.abort();
        }
        info!("engine stopped");
    }

    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_bus.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<WorkflowCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    pub fn sla_monitor(&self) -> &Arc<SlaMonitor> {
        &self.monitor
    }

    // Convenience pass-throughs to the coordinator.

    pub async fn init_workflow(
        &self,
        definition: WorkflowDefinition,
        metadata: serde_json::Value,
        client_id: Option<String>,
    ) -> crate::domain::errors::DomainResult<String> {
        self.coordinator
            .init_workflow(definition, metadata, client_id)
            .await
    }

    pub async fn start_workflow(
        &self,
        run_id: &str,
    ) -> crate::domain::errors::DomainResult<bool> {
        self.coordinator.start_workflow(run_id).await
    }

    pub async fn get_workflow_status(
        &self,
        run_id: &str,
    ) -> crate::domain::errors::DomainResult<Option<WorkflowStatusReport>> {
        self.coordinator.get_workflow_status(run_id).await
    }

    pub async fn list_tasks(
        &self,
        run_id: &str,
    ) -> crate::domain::errors::DomainResult<Vec<TaskRecord>> {
        self.coordinator.list_tasks(run_id).await
    }

    pub async fn cancel_workflow(
        &self,
        run_id: &str,
        reason: &str,
        force: bool,
        cancelled_by: &str,
    ) -> crate::domain::errors::DomainResult<bool> {
        self.coordinator
            .cancel_workflow(run_id, reason, force, cancelled_by)
            .await
    }

    pub async fn force_complete_cancellation(
        &self,
        run_id: &str,
    ) -> crate::domain::errors::DomainResult<bool> {
        self.coordinator.force_complete_cancellation(run_id).await
    }

    pub async fn list_cancelled(
        &self,
        limit: usize,
        offset: usize,
        client_id: Option<&str>,
    ) -> crate::domain::errors::DomainResult<Vec<WorkflowSummary>> {
        self.coordinator.list_cancelled(limit, offset, client_id).await
    }

    /// Publish an event on the engine bus (used by embedding surfaces).
    pub async fn publish(&self, event: EngineEvent) {
        let _ = self.event_bus.publish(event).await;
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            scheduler: self.scheduler.stats(),
            retry: self.retry_tracker.stats(),
            pools: self.worker_manager.stats(),
            pending_retries: self.retry_tracker.pending_count().await.unwrap_or(0),
        }
    }
}
