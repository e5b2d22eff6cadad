//! Logging initialization.
//!
//! Sets up the global tracing subscriber from configuration: env-filter
//! level (overridable via RUST_LOG), json or pretty formatting, optional
//! file output through a non-blocking appender.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::domain::models::LoggingConfig;

/// Initialize the global subscriber.
///
/// Returns the appender guard when logging to a file; dropping it flushes
/// buffered output, so the caller must keep it alive for the process
/// lifetime.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match &config.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "drover.log".to_string());
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            if config.format == "json" {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
            }
            Ok(Some(guard))
        }
        None => {
            if config.format == "json" {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .try_init()
                    .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
            }
            Ok(None)
        }
    }
}
