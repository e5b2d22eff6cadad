//! Engine configuration model.
//!
//! One `EngineConfig` value is loaded at startup (defaults, YAML files,
//! environment) and threaded explicitly into every component; there are no
//! process-wide singletons.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Priority scheduler weights and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Runtime weight: favor shorter tasks.
    pub alpha: f64,
    /// User priority weight.
    pub beta: f64,
    /// Deadline urgency weight.
    pub gamma: f64,
    /// Runtime estimate used when no observation exists yet.
    pub ert_default_s: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            gamma: 3.0,
            ert_default_s: 60.0,
        }
    }
}

/// Retry tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per task before a transient failure becomes terminal.
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub backoff_base_s: f64,
    /// Backoff ceiling.
    pub backoff_max_s: f64,
    /// Delay queue poll cadence.
    pub poll_interval_s: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_s: 15.0,
            backoff_max_s: 300.0,
            poll_interval_s: 1.0,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pool size per agent; `default_max_workers` applies to absent entries.
    pub max_workers_per_agent: HashMap<String, usize>,
    pub default_max_workers: usize,
    /// Base URL per agent; absent entries default to `http://{agent}:8000`.
    pub agent_urls: HashMap<String, String>,
    /// Agents the engine runs pools for.
    pub enabled_agents: Vec<String>,
    /// Per-call timeout on outbound agent requests.
    pub task_timeout_s: u64,
    /// Sleep between dequeue attempts when the queue is empty.
    pub poll_interval_ms: u64,
    /// Optional outbound requests-per-second cap per agent.
    pub rate_limit_per_agent: HashMap<String, u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers_per_agent: HashMap::new(),
            default_max_workers: 1,
            agent_urls: HashMap::new(),
            enabled_agents: Vec::new(),
            task_timeout_s: 600,
            poll_interval_ms: 200,
            rate_limit_per_agent: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    pub fn max_workers(&self, agent: &str) -> usize {
        self.max_workers_per_agent
            .get(agent)
            .copied()
            .unwrap_or(self.default_max_workers)
            .max(1)
    }

    pub fn agent_url(&self, agent: &str) -> String {
        self.agent_urls
            .get(agent)
            .cloned()
            .unwrap_or_else(|| format!("http://{agent}:8000"))
    }
}

/// SLA and deadlock monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Max age of a queued/running task before it is flagged.
    pub task_sla_s: u64,
    /// Max age of a running workflow before it is flagged.
    pub workflow_sla_s: u64,
    /// Scan cadence.
    pub monitor_interval_s: u64,
    /// Idle threshold for deadlock suspicion.
    pub pending_stale_s: u64,
    /// Cancel flagged workflows instead of only alerting.
    pub cancel_on_violation: bool,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            task_sla_s: 600,
            workflow_sla_s: 3600,
            monitor_interval_s: 30,
            pending_stale_s: 900,
            cancel_on_violation: false,
        }
    }
}

/// Records store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path. Empty string selects the in-memory store.
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".drover/drover.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// Optional log file path; stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub sla: SlaConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Agent registry: agent name to the actions it exposes. An empty
    /// matrix disables agent/action validation.
    pub agent_actions: HashMap<String, Vec<String>>,
    /// TTL on cancellation-set membership.
    pub cancellation_ttl_s: u64,
    /// Event bus channel capacity.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            sla: SlaConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            agent_actions: HashMap::new(),
            cancellation_ttl_s: 86_400,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults suitable for tests: in-memory store, short polls, monitor
    /// effectively off.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.database.path = String::new();
        config.worker.poll_interval_ms = 10;
        config.retry.poll_interval_s = 0.05;
        config.sla.monitor_interval_s = 3600;
        config
    }
}
