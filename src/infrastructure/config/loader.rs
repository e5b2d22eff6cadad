//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::EngineConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid scheduler weight {name}: {value}. Must be non-negative")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("Invalid ert_default_s: {0}. Must be positive")]
    InvalidErtDefault(f64),

    #[error(
        "Invalid backoff configuration: backoff_base_s ({0}) must not exceed backoff_max_s ({1})"
    )]
    InvalidBackoff(f64, f64),

    #[error("Invalid poll interval: {0}. Must be positive")]
    InvalidPollInterval(f64),

    #[error("Invalid max workers for agent '{0}': 0")]
    InvalidMaxWorkers(String),

    #[error("Invalid task_timeout_s: {0}. Must be at least 1")]
    InvalidTaskTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .drover/config.yaml (project config)
    /// 3. .drover/local.yaml (local overrides, optional)
    /// 4. Environment variables (DROVER_* prefix, highest priority)
    pub fn load() -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(".drover/config.yaml"))
            .merge(Yaml::file(".drover/local.yaml"))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        for (name, value) in [
            ("alpha", config.scheduler.alpha),
            ("beta", config.scheduler.beta),
            ("gamma", config.scheduler.gamma),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        if config.scheduler.ert_default_s <= 0.0 {
            return Err(ConfigError::InvalidErtDefault(config.scheduler.ert_default_s));
        }

        if config.retry.backoff_base_s > config.retry.backoff_max_s {
            return Err(ConfigError::InvalidBackoff(
                config.retry.backoff_base_s,
                config.retry.backoff_max_s,
            ));
        }
        if config.retry.poll_interval_s <= 0.0 {
            return Err(ConfigError::InvalidPollInterval(config.retry.poll_interval_s));
        }

        if config.worker.task_timeout_s == 0 {
            return Err(ConfigError::InvalidTaskTimeout(config.worker.task_timeout_s));
        }
        for (agent, workers) in &config.worker.max_workers_per_agent {
            if *workers == 0 {
                return Err(ConfigError::InvalidMaxWorkers(agent.clone()));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Agents must not be enabled under a registry that forbids them.
        if !config.agent_actions.is_empty() {
            for agent in &config.worker.enabled_agents {
                if !config.agent_actions.contains_key(agent) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "enabled agent '{agent}' is not in agent_actions"
                    )));
                }
            }
        }

        Ok(())
    }
}
