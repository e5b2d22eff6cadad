//! Durable records store: SQLite round-trips, persistence across engine
//! instances, and the in-memory fallback when the database is unreachable.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{task, test_config, wait_for_terminal, workflow, ScriptedAgent};
use drover::domain::models::{TaskStatus, WorkflowStatus};
use drover::infrastructure::database::{
    DatabaseConnection, SqliteTaskRepository, SqliteWorkflowRepository,
};
use drover::services::Engine;

async fn open_repos(
    path: &std::path::Path,
) -> (Arc<SqliteWorkflowRepository>, Arc<SqliteTaskRepository>) {
    let url = format!("sqlite:{}", path.display());
    let connection = DatabaseConnection::new(&url, 5).await.unwrap();
    connection.migrate().await.unwrap();
    let pool = connection.pool();
    (
        Arc::new(SqliteWorkflowRepository::new(pool.clone())),
        Arc::new(SqliteTaskRepository::new(pool)),
    )
}

/// A full workflow runs correctly on top of the SQLite repositories.
#[tokio::test]
async fn linear_workflow_completes_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let (runs, tasks) = open_repos(&dir.path().join("drover.db")).await;

    let engine = Engine::builder(test_config())
        .workflow_repository(runs)
        .task_repository(tasks)
        .agent_client(Arc::new(ScriptedAgent::new()))
        .build()
        .unwrap();
    engine.start();

    let run_id = engine
        .init_workflow(
            workflow("persisted", vec![task("a", &[]), task("b", &["a"])]),
            serde_json::json!({"source": "sqlite test"}),
            Some("client-42".to_string()),
        )
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.counters.completed_tasks, 2);
    assert_eq!(report.client_id.as_deref(), Some("client-42"));

    let tasks = engine.list_tasks(&run_id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(tasks.iter().all(|t| t.result.is_some()));
    assert!(tasks.iter().all(|t| t.finished_at.is_some()));
}

/// Records survive one engine instance and are visible to the next.
#[tokio::test]
async fn records_persist_across_engine_instances() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("drover.db");

    let run_id = {
        let (runs, tasks) = open_repos(&db_path).await;
        let engine = Engine::builder(test_config())
            .workflow_repository(runs)
            .task_repository(tasks)
            .agent_client(Arc::new(ScriptedAgent::new()))
            .build()
            .unwrap();
        engine
            .init_workflow(
                workflow("durable", vec![task("a", &[])]),
                serde_json::Value::Null,
                None,
            )
            .await
            .unwrap()
    };

    let (runs, tasks) = open_repos(&db_path).await;
    let engine = Engine::builder(test_config())
        .workflow_repository(runs)
        .task_repository(tasks)
        .agent_client(Arc::new(ScriptedAgent::new()))
        .build()
        .unwrap();

    let report = engine
        .get_workflow_status(&run_id)
        .await
        .unwrap()
        .expect("workflow lost across restart");
    assert_eq!(report.status, WorkflowStatus::Pending);
    assert_eq!(report.counters.total_tasks, 1);

    let tasks = engine.list_tasks(&run_id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[0].in_degree, 0);
}

/// An unreachable database degrades to the in-memory store instead of
/// failing engine construction.
#[tokio::test]
async fn unreachable_database_falls_back_to_memory() {
    let mut config = test_config();
    // A directory that cannot exist: parent is a file.
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    config.database.path = blocker
        .join("nested")
        .join("drover.db")
        .to_string_lossy()
        .to_string();

    let engine = Engine::from_config(config).await.expect("fallback failed");

    let run_id = engine
        .init_workflow(
            workflow("ephemeral", vec![task("a", &[])]),
            serde_json::Value::Null,
            None,
        )
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = engine.get_workflow_status(&run_id).await.unwrap().unwrap();
    assert_eq!(report.status, WorkflowStatus::Running);
    assert_eq!(engine.scheduler().queue_size(Some("x")), 1);
}
