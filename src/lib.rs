//! Drover — workflow orchestration engine for multi-agent data pipelines.
//!
//! A workflow is a directed acyclic graph of tasks; each task names a
//! remote HTTP agent and an action it exposes. The engine schedules ready
//! tasks by priority, drives them across bounded per-agent worker pools,
//! retries transient failures with exponential backoff, propagates
//! cancellation, and watches for SLA violations and deadlocks.

pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, FailureKind};
pub use domain::models::{
    EngineConfig, EngineEvent, EventEnvelope, TaskDefinition, TaskRecord, TaskStatus,
    WorkflowDefinition, WorkflowRecord, WorkflowStatus,
};
pub use services::{Engine, EngineBuilder};
