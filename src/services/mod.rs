//! Service layer: the execution engine proper.

pub mod agent_registry;
pub mod coordinator;
pub mod dependency_resolver;
pub mod engine;
pub mod event_bus;
pub mod retry_tracker;
pub mod scheduler;
pub mod sla_monitor;
pub mod worker_pool;

pub use agent_registry::AgentRegistry;
pub use coordinator::WorkflowCoordinator;
pub use dependency_resolver::DependencyResolver;
pub use engine::{Engine, EngineBuilder, EngineStats};
pub use event_bus::{EventBus, RetryingPublisher};
pub use retry_tracker::{RetryInfo, RetryTracker, RetryTrackerStats};
pub use scheduler::{PriorityScheduler, QueuedTaskInfo, SchedulerStats};
pub use sla_monitor::SlaMonitor;
pub use worker_pool::{AgentWorkerPool, PoolStats, TaskEventSink, WorkerManager, WorkerStats};
