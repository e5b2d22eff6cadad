//! HTTP client for agent execution.
//!
//! Agents expose `POST {base_url}/execute`; a 2xx JSON body is the task
//! result, any other status is a failure carrying the response body as the
//! error string.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::domain::ports::{AgentCallError, AgentClient, AgentRequest};

pub struct HttpAgentClient {
    client: reqwest::Client,
    timeout_s: u64,
}

impl HttpAgentClient {
    pub fn new(timeout_s: u64) -> Result<Self, AgentCallError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s.max(1)))
            .build()
            .map_err(|e| AgentCallError::Connection(e.to_string()))?;
        Ok(Self { client, timeout_s })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn execute(
        &self,
        base_url: &str,
        request: &AgentRequest,
    ) -> Result<serde_json::Value, AgentCallError> {
        let url = format!("{}/execute", base_url.trim_end_matches('/'));
        let payload = json!({
            "task_id": request.task_id,
            "action": request.action,
            "params": request.params,
            "run_id": request.run_id,
            "metadata": request.metadata,
        });

        debug!(url = %url, task_id = %request.task_id, "calling agent");
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentCallError::Timeout(self.timeout_s)
                } else {
                    AgentCallError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| AgentCallError::InvalidResponse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AgentCallError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
