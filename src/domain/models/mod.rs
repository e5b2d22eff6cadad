//! Domain models for the drover workflow engine.

pub mod config;
pub mod definition;
pub mod event;
pub mod task;
pub mod workflow;

pub use config::{
    DatabaseConfig, EngineConfig, LoggingConfig, RetryConfig, SchedulerConfig, SlaConfig,
    WorkerConfig,
};
pub use definition::{TaskDefinition, WorkflowDefinition};
pub use event::{EngineEvent, EventEnvelope, SlaResource};
pub use task::{TaskRecord, TaskStatus};
pub use workflow::{
    CancellationInfo, WorkflowCounters, WorkflowRecord, WorkflowStatus, WorkflowStatusReport,
    WorkflowSummary,
};
