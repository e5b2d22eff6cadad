//! Shared fixtures for engine integration tests.

// Each integration test binary compiles this module separately and none of
// them uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use drover::domain::models::{
    EngineConfig, EventEnvelope, TaskDefinition, WorkflowDefinition, WorkflowStatusReport,
};
use drover::domain::ports::{AgentCallError, AgentClient, AgentRequest};
use drover::services::Engine;

/// Agent client whose responses are scripted per task id.
///
/// Unscripted tasks succeed with an echo payload. Each scripted outcome is
/// consumed once, so "fail twice then succeed" is a three-entry script.
pub struct ScriptedAgent {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, AgentCallError>>>>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call holds the "HTTP connection" open this long first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn script(&self, task_id: &str, outcomes: Vec<Result<Value, AgentCallError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), outcomes.into());
    }

    /// Task ids in the order they were called.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn execute(
        &self,
        _base_url: &str,
        request: &AgentRequest,
    ) -> Result<Value, AgentCallError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(request.task_id.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.task_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => Ok(json!({"echo": request.params, "action": request.action})),
        }
    }
}

pub fn http_status(status: u16, body: &str) -> Result<Value, AgentCallError> {
    Err(AgentCallError::Status {
        status,
        body: body.to_string(),
    })
}

/// Engine config wired for fast tests: in-memory stores, 10 ms worker
/// polls, agent `x` enabled with a permissive action matrix.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::for_testing();
    config.worker.enabled_agents = vec!["x".to_string()];
    config
        .agent_actions
        .insert("x".to_string(), vec!["work".to_string()]);
    config
}

pub fn build_engine(config: EngineConfig, agent: Arc<ScriptedAgent>) -> Engine {
    Engine::builder(config)
        .agent_client(agent)
        .build()
        .expect("engine build failed")
}

/// Background collector over the engine event stream.
pub struct EventLog {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl EventLog {
    pub fn attach(engine: &Engine) -> Self {
        let mut rx = engine.subscribe();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            while let Ok(envelope) = rx.recv().await {
                sink.lock().unwrap().push(envelope);
            }
        });
        Self { events }
    }

    pub fn snapshot(&self) -> Vec<EventEnvelope> {
        self.events.lock().unwrap().clone()
    }

    /// `(kind, task_id)` pairs for one run, in publish order.
    pub fn timeline(&self, run_id: &str) -> Vec<(String, Option<String>)> {
        self.snapshot()
            .iter()
            .filter(|e| e.event.run_id() == run_id)
            .map(|e| {
                (
                    e.event.kind().to_string(),
                    e.event.task_id().map(ToString::to_string),
                )
            })
            .collect()
    }

    pub fn count(&self, run_id: &str, kind: &str) -> usize {
        self.timeline(run_id)
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }
}

/// Task definition on agent `x` / action `work`.
pub fn task(id: &str, deps: &[&str]) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        agent: "x".to_string(),
        action: "work".to_string(),
        params: json!({"task": id}),
        depends_on: deps.iter().map(ToString::to_string).collect(),
        priority: None,
        deadline: None,
    }
}

pub fn workflow(name: &str, tasks: Vec<TaskDefinition>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: Some(name.to_string()),
        tasks,
        metadata: Value::Null,
    }
}

/// Poll until the workflow reaches a terminal status.
pub async fn wait_for_terminal(
    engine: &Engine,
    run_id: &str,
    timeout: Duration,
) -> WorkflowStatusReport {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let report = engine
            .get_workflow_status(run_id)
            .await
            .expect("status query failed")
            .expect("workflow missing");
        if report.status.is_terminal() {
            // Give the event collector a beat to drain the broadcast channel
            // before callers assert on timelines.
            tokio::time::sleep(Duration::from_millis(50)).await;
            return report;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow {run_id} still {} after {timeout:?}",
            report.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until an arbitrary condition holds.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
