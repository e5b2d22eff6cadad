//! Downstream agent contract.
//!
//! Agents are remote HTTP workers exposing named actions. The engine calls
//! `POST {base_url}/execute` with the task envelope; a 2xx body becomes the
//! task result, anything else is a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request envelope sent to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub task_id: String,
    pub action: String,
    pub params: serde_json::Value,
    pub run_id: String,
    pub metadata: serde_json::Value,
}

/// Errors from an outbound agent call.
#[derive(Error, Debug, Clone)]
pub enum AgentCallError {
    /// The call exceeded the configured task timeout
    #[error("Agent call timed out after {0} seconds")]
    Timeout(u64),

    /// Connection could not be established or broke mid-call
    #[error("Connection to agent failed: {0}")]
    Connection(String),

    /// The agent answered with a non-2xx status
    #[error("Agent returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The 2xx response body was not valid JSON
    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

impl AgentCallError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts, connection failures, and 5xx answers are transient; 4xx
    /// means the request itself is bad and will not improve with retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Outbound HTTP seam to agents; mocked in tests.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Execute one task against the agent at `base_url`.
    async fn execute(
        &self,
        base_url: &str,
        request: &AgentRequest,
    ) -> Result<serde_json::Value, AgentCallError>;
}
