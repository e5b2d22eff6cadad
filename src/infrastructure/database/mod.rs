//! SQLite-backed records store.
//!
//! The durable implementation of the workflow and task repositories. When
//! the database cannot be opened the engine falls back to the in-memory
//! store; see `Engine::from_config`.

pub mod connection;
pub mod task_repo;
pub mod utils;
pub mod workflow_repo;

pub use connection::DatabaseConnection;
pub use task_repo::SqliteTaskRepository;
pub use workflow_repo::SqliteWorkflowRepository;
