//! Ports: capability interfaces the engine core consumes.
//!
//! Concrete implementations live under `infrastructure`; an in-memory
//! implementation of every port exists as the single-process fallback.

pub mod agent_client;
pub mod cancellation;
pub mod delay_queue;
pub mod estimate_store;
pub mod event_publisher;
pub mod task_repository;
pub mod workflow_repository;

pub use agent_client::{AgentCallError, AgentClient, AgentRequest};
pub use cancellation::CancellationSet;
pub use delay_queue::{DelayKey, DelayQueue};
pub use estimate_store::RuntimeEstimateStore;
pub use event_publisher::EventPublisher;
pub use task_repository::TaskRepository;
pub use workflow_repository::WorkflowRepository;
