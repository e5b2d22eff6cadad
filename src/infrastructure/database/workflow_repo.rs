//! SQLite implementation of the workflow repository using sqlx.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CancellationInfo, WorkflowCounters, WorkflowRecord, WorkflowStatus,
};
use crate::domain::ports::WorkflowRepository;
use crate::infrastructure::database::utils::{
    parse_datetime, parse_optional_datetime, store_err,
};

pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DomainResult<WorkflowRecord> {
        let status_str: String = row.get("status");
        let status = WorkflowStatus::from_str(&status_str).ok_or_else(|| {
            DomainError::Store(format!("unknown workflow status '{status_str}'"))
        })?;

        let definition = serde_json::from_str(&row.get::<String, _>("definition"))
            .map_err(|e| DomainError::Store(format!("invalid definition: {e}")))?;

        let cancellation = match (
            row.get::<Option<String>, _>("cancellation_reason"),
            row.get::<Option<String>, _>("cancelled_by"),
            row.get::<Option<String>, _>("cancelled_at"),
        ) {
            (Some(reason), Some(cancelled_by), Some(cancelled_at)) => Some(CancellationInfo {
                reason,
                cancelled_by,
                cancelled_at: parse_datetime(&cancelled_at)?,
            }),
            _ => None,
        };

        Ok(WorkflowRecord {
            run_id: row.get("run_id"),
            definition,
            status,
            counters: WorkflowCounters {
                total_tasks: row.get::<i64, _>("total_tasks") as u32,
                completed_tasks: row.get::<i64, _>("completed_tasks") as u32,
                failed_tasks: row.get::<i64, _>("failed_tasks") as u32,
            },
            cancellation,
            metadata: row
                .get::<Option<String>, _>("metadata")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DomainError::Store(format!("invalid metadata: {e}")))?
                .unwrap_or(serde_json::Value::Null),
            client_id: row.get("client_id"),
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            started_at: parse_optional_datetime(
                row.get::<Option<String>, _>("started_at").as_deref(),
            )?,
            finished_at: parse_optional_datetime(
                row.get::<Option<String>, _>("finished_at").as_deref(),
            )?,
            sla_violated_at: parse_optional_datetime(
                row.get::<Option<String>, _>("sla_violated_at").as_deref(),
            )?,
        })
    }

    async fn upsert(&self, record: &WorkflowRecord) -> DomainResult<()> {
        let definition = serde_json::to_string(&record.definition)
            .map_err(|e| DomainError::Store(e.to_string()))?;
        let metadata = if record.metadata.is_null() {
            None
        } else {
            Some(record.metadata.to_string())
        };
        let cancellation_reason = record.cancellation.as_ref().map(|c| c.reason.clone());
        let cancelled_by = record.cancellation.as_ref().map(|c| c.cancelled_by.clone());
        let cancelled_at = record
            .cancellation
            .as_ref()
            .map(|c| c.cancelled_at.to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO runs (
                run_id, name, definition, status,
                total_tasks, completed_tasks, failed_tasks,
                cancellation_reason, cancelled_by, cancelled_at,
                metadata, client_id, created_at, updated_at,
                started_at, finished_at, sla_violated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                status = excluded.status,
                total_tasks = excluded.total_tasks,
                completed_tasks = excluded.completed_tasks,
                failed_tasks = excluded.failed_tasks,
                cancellation_reason = excluded.cancellation_reason,
                cancelled_by = excluded.cancelled_by,
                cancelled_at = excluded.cancelled_at,
                metadata = excluded.metadata,
                client_id = excluded.client_id,
                updated_at = excluded.updated_at,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                sla_violated_at = excluded.sla_violated_at
            "#,
        )
        .bind(&record.run_id)
        .bind(record.name())
        .bind(&definition)
        .bind(record.status.as_str())
        .bind(i64::from(record.counters.total_tasks))
        .bind(i64::from(record.counters.completed_tasks))
        .bind(i64::from(record.counters.failed_tasks))
        .bind(&cancellation_reason)
        .bind(&cancelled_by)
        .bind(&cancelled_at)
        .bind(&metadata)
        .bind(&record.client_id)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.started_at.as_ref().map(|t| t.to_rfc3339()))
        .bind(record.finished_at.as_ref().map(|t| t.to_rfc3339()))
        .bind(record.sla_violated_at.as_ref().map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create(&self, record: &WorkflowRecord) -> DomainResult<()> {
        self.upsert(record).await
    }

    async fn get(&self, run_id: &str) -> DomainResult<Option<WorkflowRecord>> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update(&self, record: &WorkflowRecord) -> DomainResult<()> {
        self.upsert(record).await
    }

    async fn list_by_status(
        &self,
        statuses: &[WorkflowStatus],
    ) -> DomainResult<Vec<WorkflowRecord>> {
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!("SELECT * FROM runs WHERE status IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_cancelled(
        &self,
        limit: usize,
        offset: usize,
        client_id: Option<&str>,
    ) -> DomainResult<Vec<WorkflowRecord>> {
        let base = "SELECT * FROM runs WHERE status IN ('cancelled', 'cancelling')";
        let sql = if client_id.is_some() {
            format!("{base} AND client_id = ? ORDER BY cancelled_at DESC LIMIT ? OFFSET ?")
        } else {
            format!("{base} ORDER BY cancelled_at DESC LIMIT ? OFFSET ?")
        };
        let mut query = sqlx::query(&sql);
        if let Some(client) = client_id {
            query = query.bind(client);
        }
        let rows = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
