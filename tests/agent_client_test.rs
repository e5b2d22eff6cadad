//! HTTP contract tests for the agent client against a mock server.

use serde_json::json;

use drover::domain::ports::{AgentCallError, AgentClient, AgentRequest};
use drover::infrastructure::agent::HttpAgentClient;

fn request() -> AgentRequest {
    AgentRequest {
        task_id: "t1".to_string(),
        action: "profile".to_string(),
        params: json!({"dataset": "train.csv"}),
        run_id: "run_1".to_string(),
        metadata: json!({"client": "tests"}),
    }
}

#[tokio::test]
async fn success_returns_response_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/execute")
        .match_body(mockito::Matcher::PartialJson(json!({
            "task_id": "t1",
            "action": "profile",
            "run_id": "run_1",
            "params": {"dataset": "train.csv"},
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"rows": 10000, "columns": 12}"#)
        .create_async()
        .await;

    let client = HttpAgentClient::new(5).unwrap();
    let result = client.execute(&server.url(), &request()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(result["rows"], 10000);
    assert_eq!(result["columns"], 12);
}

#[tokio::test]
async fn base_url_trailing_slash_is_tolerated() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/execute")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = HttpAgentClient::new(5).unwrap();
    let url = format!("{}/", server.url());
    client.execute(&url, &request()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn server_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/execute")
        .with_status(503)
        .with_body("worker pool exhausted")
        .create_async()
        .await;

    let client = HttpAgentClient::new(5).unwrap();
    let error = client.execute(&server.url(), &request()).await.unwrap_err();

    match &error {
        AgentCallError::Status { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "worker pool exhausted");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.is_transient());
}

#[tokio::test]
async fn client_error_is_terminal() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/execute")
        .with_status(422)
        .with_body("unknown dataset")
        .create_async()
        .await;

    let client = HttpAgentClient::new(5).unwrap();
    let error = client.execute(&server.url(), &request()).await.unwrap_err();
    assert!(matches!(error, AgentCallError::Status { status: 422, .. }));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn non_json_success_body_is_invalid_response() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/execute")
        .with_status(200)
        .with_body("<html>not json</html>")
        .create_async()
        .await;

    let client = HttpAgentClient::new(5).unwrap();
    let error = client.execute(&server.url(), &request()).await.unwrap_err();
    assert!(matches!(error, AgentCallError::InvalidResponse(_)));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn unreachable_agent_is_a_connection_error() {
    // Nothing listens on this port.
    let client = HttpAgentClient::new(1).unwrap();
    let error = client
        .execute("http://127.0.0.1:9", &request())
        .await
        .unwrap_err();
    match &error {
        AgentCallError::Connection(_) | AgentCallError::Timeout(_) => {}
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.is_transient());
}
