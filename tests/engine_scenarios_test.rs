//! End-to-end engine scenarios against an in-memory engine with a scripted
//! agent: linear and diamond DAGs, retries, failure cascade, mid-flight
//! cancellation, and cross-workflow priority ordering.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{
    build_engine, http_status, task, test_config, wait_for_terminal, workflow, EventLog,
    ScriptedAgent,
};
use drover::domain::models::{TaskStatus, WorkflowStatus};

/// S1 — Linear DAG, all succeed: strict event order and final counters.
#[tokio::test]
async fn linear_dag_completes_in_order() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = build_engine(test_config(), agent.clone());
    let log = EventLog::attach(&engine);
    engine.start();

    let def = workflow(
        "w1",
        vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])],
    );
    let run_id = engine
        .init_workflow(def, serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.counters.total_tasks, 3);
    assert_eq!(report.counters.completed_tasks, 3);
    assert_eq!(report.counters.failed_tasks, 0);

    let expected = [
        ("WORKFLOW_STARTED", None),
        ("TASK_STARTED", Some("a")),
        ("TASK_SUCCESS", Some("a")),
        ("TASK_STARTED", Some("b")),
        ("TASK_SUCCESS", Some("b")),
        ("TASK_STARTED", Some("c")),
        ("TASK_SUCCESS", Some("c")),
        ("WORKFLOW_COMPLETED", None),
    ];
    let timeline = log.timeline(&run_id);
    assert_eq!(
        timeline,
        expected
            .iter()
            .map(|(k, t)| ((*k).to_string(), t.map(ToString::to_string)))
            .collect::<Vec<_>>()
    );

    assert_eq!(agent.calls(), vec!["a", "b", "c"]);
}

/// S2 — Diamond with two workers: the middle tasks overlap, the join waits
/// for both.
#[tokio::test]
async fn diamond_middle_runs_in_parallel() {
    let mut config = test_config();
    config.worker.max_workers_per_agent.insert("x".to_string(), 2);

    let agent = Arc::new(ScriptedAgent::with_delay(Duration::from_millis(80)));
    let engine = build_engine(config, agent);
    let log = EventLog::attach(&engine);
    engine.start();

    let def = workflow(
        "diamond",
        vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ],
    );
    let run_id = engine
        .init_workflow(def, serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;
    assert_eq!(report.status, WorkflowStatus::Completed);

    let timeline = log.timeline(&run_id);
    let position = |kind: &str, task: &str| {
        timeline
            .iter()
            .position(|(k, t)| k == kind && t.as_deref() == Some(task))
            .unwrap_or_else(|| panic!("{kind}({task}) missing from {timeline:?}"))
    };

    // Both middle tasks start before either finishes.
    let started_b = position("TASK_STARTED", "b");
    let started_c = position("TASK_STARTED", "c");
    let success_b = position("TASK_SUCCESS", "b");
    let success_c = position("TASK_SUCCESS", "c");
    assert!(started_b < success_b.min(success_c));
    assert!(started_c < success_b.min(success_c));

    // The join starts only after both predecessors succeeded.
    let started_d = position("TASK_STARTED", "d");
    assert!(started_d > success_b);
    assert!(started_d > success_c);
}

/// S3 — Transient failure then success: two 503s, then 200, with the retry
/// count persisted on the task record.
#[tokio::test]
async fn transient_failures_retry_until_success() {
    let mut config = test_config();
    config.retry.max_retries = 3;
    config.retry.backoff_base_s = 0.1;
    config.retry.backoff_max_s = 1.0;

    let agent = Arc::new(ScriptedAgent::new());
    agent.script(
        "a",
        vec![
            http_status(503, "overloaded"),
            http_status(503, "overloaded"),
            Ok(json!({"recovered": true})),
        ],
    );

    let engine = build_engine(config, agent);
    let log = EventLog::attach(&engine);
    engine.start();

    let run_id = engine
        .init_workflow(
            workflow("flaky", vec![task("a", &[])]),
            serde_json::Value::Null,
            None,
        )
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;
    assert_eq!(report.status, WorkflowStatus::Completed);

    let kinds: Vec<String> = log
        .timeline(&run_id)
        .into_iter()
        .filter(|(_, t)| t.as_deref() == Some("a"))
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        kinds,
        vec![
            "TASK_STARTED",
            "TASK_FAILED",
            "TASK_STARTED",
            "TASK_FAILED",
            "TASK_STARTED",
            "TASK_SUCCESS"
        ]
    );

    let tasks = engine.list_tasks(&run_id).await.unwrap();
    assert_eq!(tasks[0].retries, 2);
    assert_eq!(tasks[0].result.as_ref().unwrap()["recovered"], true);
}

/// S4 — Terminal failure cascades: a 400 with no retry budget fails the
/// workflow and the successors are only ever observed cancelled.
#[tokio::test]
async fn validation_failure_fails_workflow_and_cancels_successors() {
    let mut config = test_config();
    config.retry.max_retries = 0;

    let agent = Arc::new(ScriptedAgent::new());
    agent.script("a", vec![http_status(400, "bad params")]);

    let engine = build_engine(config, agent.clone());
    let log = EventLog::attach(&engine);
    engine.start();

    let def = workflow(
        "doomed",
        vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])],
    );
    let run_id = engine
        .init_workflow(def, serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.counters.failed_tasks, 1);
    assert_eq!(report.counters.completed_tasks, 0);

    // Terminal accounting: completed + failed + cancelled == total.
    assert_eq!(report.task_counts.get(&TaskStatus::Failed), Some(&1));
    assert_eq!(report.task_counts.get(&TaskStatus::Cancelled), Some(&2));

    let timeline = log.timeline(&run_id);
    let failed_at = timeline
        .iter()
        .position(|(k, _)| k == "TASK_FAILED")
        .unwrap();
    let workflow_failed_at = timeline
        .iter()
        .position(|(k, _)| k == "WORKFLOW_FAILED")
        .unwrap();
    assert!(failed_at < workflow_failed_at);

    // The successors never started; the agent saw only task a.
    assert!(!timeline
        .iter()
        .any(|(k, t)| k == "TASK_STARTED" && t.as_deref() != Some("a")));
    assert_eq!(log.count(&run_id, "TASK_CANCELLED"), 2);
    assert_eq!(agent.calls(), vec!["a"]);
}

/// S5 — Mid-flight cancel: the pending successor is cancelled immediately,
/// the in-flight task's result is discarded when its call returns.
#[tokio::test]
async fn cancellation_discards_in_flight_result() {
    let agent = Arc::new(ScriptedAgent::with_delay(Duration::from_millis(300)));
    let engine = build_engine(test_config(), agent);
    let log = EventLog::attach(&engine);
    engine.start();

    let def = workflow("cancel_me", vec![task("a", &[]), task("b", &["a"])]);
    let run_id = engine
        .init_workflow(def, serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    // Wait until a is inside the agent call.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = engine.list_tasks(&run_id).await.unwrap();
        if tasks
            .iter()
            .any(|t| t.task_id == "a" && t.status == TaskStatus::Running)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task a never started running"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(engine
        .cancel_workflow(&run_id, "operator abort", false, "tester")
        .await
        .unwrap());

    // b was drained directly; the workflow is cancelling until a returns.
    let status = engine
        .get_workflow_status(&run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, WorkflowStatus::Cancelling);

    let report = wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;

    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert_eq!(report.task_counts.get(&TaskStatus::Cancelled), Some(&2));
    assert_eq!(report.counters.completed_tasks, 0);
    assert!(report.cancellation.is_some());
    assert_eq!(report.cancellation.as_ref().unwrap().cancelled_by, "tester");

    // a produced no TASK_SUCCESS; b never started.
    assert_eq!(log.count(&run_id, "TASK_SUCCESS"), 0);
    assert_eq!(log.count(&run_id, "WORKFLOW_CANCELLATION_INITIATED"), 1);
    let timeline = log.timeline(&run_id);
    assert!(!timeline
        .iter()
        .any(|(k, t)| k == "TASK_STARTED" && t.as_deref() == Some("b")));

    // The record keeps no result for the discarded call.
    let tasks = engine.list_tasks(&run_id).await.unwrap();
    let a = tasks.iter().find(|t| t.task_id == "a").unwrap();
    assert_eq!(a.status, TaskStatus::Cancelled);
    assert!(a.result.is_none());
}

/// S6 — Priority ordering: with one worker and equal ERTs, every
/// high-priority task dequeues before any low-priority one.
#[tokio::test]
async fn user_priority_orders_cross_workflow_dequeues() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = build_engine(test_config(), agent.clone());

    let high_tasks: Vec<_> = (0..10)
        .map(|i| {
            let mut t = task(&format!("hi{i}"), &[]);
            t.priority = Some(0.9);
            t
        })
        .collect();
    let low_tasks: Vec<_> = (0..10)
        .map(|i| {
            let mut t = task(&format!("lo{i}"), &[]);
            t.priority = Some(0.1);
            t
        })
        .collect();

    // Enqueue everything before any worker runs so all twenty are ready at
    // the same instant.
    let low_run = engine
        .init_workflow(workflow("w2", low_tasks), serde_json::Value::Null, None)
        .await
        .unwrap();
    let high_run = engine
        .init_workflow(workflow("w1", high_tasks), serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&low_run).await.unwrap();
    engine.start_workflow(&high_run).await.unwrap();

    engine.start();
    let high_report = wait_for_terminal(&engine, &high_run, Duration::from_secs(10)).await;
    let low_report = wait_for_terminal(&engine, &low_run, Duration::from_secs(10)).await;
    engine.shutdown().await;

    assert_eq!(high_report.status, WorkflowStatus::Completed);
    assert_eq!(low_report.status, WorkflowStatus::Completed);

    let calls = agent.calls();
    assert_eq!(calls.len(), 20);
    assert!(
        calls[..10].iter().all(|id| id.starts_with("hi")),
        "high-priority tasks were not drained first: {calls:?}"
    );
    assert!(calls[10..].iter().all(|id| id.starts_with("lo")));
}

/// Invariant: no task id observes TASK_STARTED twice without an intervening
/// retry announcement.
#[tokio::test]
async fn no_double_starts_without_retry() {
    let mut config = test_config();
    config.worker.max_workers_per_agent.insert("x".to_string(), 4);

    let agent = Arc::new(ScriptedAgent::new());
    let engine = build_engine(config, agent);
    let log = EventLog::attach(&engine);
    engine.start();

    let tasks: Vec<_> = (0..12).map(|i| task(&format!("t{i}"), &[])).collect();
    let run_id = engine
        .init_workflow(workflow("fanout", tasks), serde_json::Value::Null, None)
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();
    wait_for_terminal(&engine, &run_id, Duration::from_secs(10)).await;
    engine.shutdown().await;

    let timeline = log.timeline(&run_id);
    for i in 0..12 {
        let id = format!("t{i}");
        let starts = timeline
            .iter()
            .filter(|(k, t)| k == "TASK_STARTED" && t.as_deref() == Some(id.as_str()))
            .count();
        assert_eq!(starts, 1, "task {id} started {starts} times");
    }
}

/// Force-completing a cancellation reaps a task stuck in a long agent call.
#[tokio::test]
async fn force_complete_reaps_running_tasks() {
    let agent = Arc::new(ScriptedAgent::with_delay(Duration::from_secs(30)));
    let engine = build_engine(test_config(), agent);
    engine.start();

    let run_id = engine
        .init_workflow(
            workflow("stuck", vec![task("a", &[])]),
            serde_json::Value::Null,
            None,
        )
        .await
        .unwrap();
    engine.start_workflow(&run_id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = engine.list_tasks(&run_id).await.unwrap();
        if tasks[0].status == TaskStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    engine
        .cancel_workflow(&run_id, "stuck agent", false, "tester")
        .await
        .unwrap();
    let mid = engine.get_workflow_status(&run_id).await.unwrap().unwrap();
    assert_eq!(mid.status, WorkflowStatus::Cancelling);

    assert!(engine.force_complete_cancellation(&run_id).await.unwrap());
    let report = engine.get_workflow_status(&run_id).await.unwrap().unwrap();
    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert_eq!(report.task_counts.get(&TaskStatus::Cancelled), Some(&1));

    // Idempotent once settled.
    assert!(!engine.force_complete_cancellation(&run_id).await.unwrap());

    let cancelled = engine.list_cancelled(10, 0, None).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].run_id, run_id);
    // No graceful shutdown here: the worker is parked in the 30 s agent
    // call and the test runtime reaps it on drop.
}
