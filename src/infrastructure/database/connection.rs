//! Database connection pool manager.
//!
//! Manages the SQLite connection pool with WAL mode enabled for better
//! concurrency. Handles connection lifecycle, schema creation, and
//! configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

/// SQLite connection pool with pragmas tuned for concurrent access.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool.
    ///
    /// # Configuration
    /// - Journal mode: WAL (Write-Ahead Logging)
    /// - Synchronous: NORMAL
    /// - Foreign keys: enabled
    /// - Busy timeout: 5 seconds
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("failed to connect to database")?;

        info!(url = database_url, "database connection pool created");
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration statement failed: {statement}"))?;
        }
        info!("database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        run_id              TEXT PRIMARY KEY,
        name                TEXT,
        definition          TEXT NOT NULL,
        status              TEXT NOT NULL,
        total_tasks         INTEGER NOT NULL DEFAULT 0,
        completed_tasks     INTEGER NOT NULL DEFAULT 0,
        failed_tasks        INTEGER NOT NULL DEFAULT 0,
        cancellation_reason TEXT,
        cancelled_by        TEXT,
        cancelled_at        TEXT,
        metadata            TEXT,
        client_id           TEXT,
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        started_at          TEXT,
        finished_at         TEXT,
        sla_violated_at     TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)",
    "CREATE INDEX IF NOT EXISTS idx_runs_client ON runs(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_cancelled_at ON runs(cancelled_at)",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        run_id             TEXT NOT NULL,
        task_id            TEXT NOT NULL,
        agent              TEXT NOT NULL,
        action             TEXT NOT NULL,
        params             TEXT,
        depends_on         TEXT NOT NULL,
        in_degree          INTEGER NOT NULL,
        original_in_degree INTEGER NOT NULL,
        status             TEXT NOT NULL,
        retries            INTEGER NOT NULL DEFAULT 0,
        last_error         TEXT,
        user_priority      REAL,
        deadline           TEXT,
        result             TEXT,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL,
        queued_at          TEXT,
        started_at         TEXT,
        finished_at        TEXT,
        sla_violated_at    TEXT,
        PRIMARY KEY (run_id, task_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_run ON tasks(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_in_degree ON tasks(run_id, in_degree)",
];
