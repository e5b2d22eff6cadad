//! SQLite implementation of the task repository using sqlx.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{TaskRecord, TaskStatus};
use crate::domain::ports::TaskRepository;
use crate::infrastructure::database::utils::{
    parse_datetime, parse_optional_datetime, store_err,
};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> DomainResult<TaskRecord> {
        let status_str: String = row.get("status");
        let status = TaskStatus::from_str(&status_str)
            .ok_or_else(|| DomainError::Store(format!("unknown task status '{status_str}'")))?;

        let depends_on: Vec<String> = serde_json::from_str(&row.get::<String, _>("depends_on"))
            .map_err(|e| DomainError::Store(format!("invalid depends_on: {e}")))?;

        Ok(TaskRecord {
            run_id: row.get("run_id"),
            task_id: row.get("task_id"),
            agent: row.get("agent"),
            action: row.get("action"),
            params: row
                .get::<Option<String>, _>("params")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DomainError::Store(format!("invalid params: {e}")))?
                .unwrap_or(serde_json::Value::Null),
            depends_on,
            in_degree: row.get::<i64, _>("in_degree") as u32,
            original_in_degree: row.get::<i64, _>("original_in_degree") as u32,
            status,
            retries: row.get::<i64, _>("retries") as u32,
            last_error: row.get("last_error"),
            user_priority: row.get("user_priority"),
            deadline: parse_optional_datetime(row.get::<Option<String>, _>("deadline").as_deref())?,
            result: row
                .get::<Option<String>, _>("result")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DomainError::Store(format!("invalid result: {e}")))?,
            created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
            updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
            queued_at: parse_optional_datetime(
                row.get::<Option<String>, _>("queued_at").as_deref(),
            )?,
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

    fn bind_task<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        task: &'q TaskRecord,
        depends_on: &'q str,
        params: Option<&'q str>,
        result: Option<&'q str>,
        timestamps: &'q TaskTimestamps,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(&task.run_id)
            .bind(&task.task_id)
            .bind(&task.agent)
            .bind(&task.action)
            .bind(params)
            .bind(depends_on)
            .bind(task.in_degree as i64)
            .bind(task.original_in_degree as i64)
            .bind(task.status.as_str())
            .bind(task.retries as i64)
            .bind(&task.last_error)
            .bind(task.user_priority)
            .bind(&timestamps.deadline)
            .bind(result)
            .bind(&timestamps.created_at)
            .bind(&timestamps.updated_at)
            .bind(&timestamps.queued_at)
            .bind(&timestamps.started_at)
            .bind(&timestamps.finished_at)
            .bind(&timestamps.sla_violated_at)
    }
}

/// RFC 3339 renderings of a task's timestamp fields, bound by reference.
struct TaskTimestamps {
    deadline: Option<String>,
    created_at: String,
    updated_at: String,
    queued_at: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    sla_violated_at: Option<String>,
}

impl TaskTimestamps {
    fn of(task: &TaskRecord) -> Self {
        let fmt = |dt: &DateTime<Utc>| dt.to_rfc3339();
        Self {
            deadline: task.deadline.as_ref().map(fmt),
            created_at: fmt(&task.created_at),
            updated_at: fmt(&task.updated_at),
            queued_at: task.queued_at.as_ref().map(fmt),
            started_at: task.started_at.as_ref().map(fmt),
            finished_at: task.finished_at.as_ref().map(fmt),
            sla_violated_at: task.sla_violated_at.as_ref().map(fmt),
        }
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO tasks (
        run_id, task_id, agent, action, params, depends_on,
        in_degree, original_in_degree, status, retries, last_error,
        user_priority, deadline, result, created_at, updated_at,
        queued_at, started_at, finished_at, sla_violated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (run_id, task_id) DO UPDATE SET
        agent = excluded.agent,
        action = excluded.action,
        params = excluded.params,
        depends_on = excluded.depends_on,
        in_degree = excluded.in_degree,
        original_in_degree = excluded.original_in_degree,
        status = excluded.status,
        retries = excluded.retries,
        last_error = excluded.last_error,
        user_priority = excluded.user_priority,
        deadline = excluded.deadline,
        result = excluded.result,
        updated_at = excluded.updated_at,
        queued_at = excluded.queued_at,
        started_at = excluded.started_at,
        finished_at = excluded.finished_at,
        sla_violated_at = excluded.sla_violated_at
"#;

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create_many(&self, tasks: &[TaskRecord]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for task in tasks {
            let depends_on = serde_json::to_string(&task.depends_on)
                .map_err(|e| DomainError::Store(e.to_string()))?;
            let params = if task.params.is_null() {
                None
            } else {
                Some(task.params.to_string())
            };
            let result = task.result.as_ref().map(ToString::to_string);
            let timestamps = TaskTimestamps::of(task);
            Self::bind_task(
                sqlx::query(UPSERT_SQL),
                task,
                &depends_on,
                params.as_deref(),
                result.as_deref(),
                &timestamps,
            )
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)
    }

    async fn get(&self, run_id: &str, task_id: &str) -> DomainResult<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE run_id = ? AND task_id = ?")
            .bind(run_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &TaskRecord) -> DomainResult<()> {
        self.create_many(std::slice::from_ref(task)).await
    }

    async fn list_by_run(&self, run_id: &str) -> DomainResult<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE run_id = ? ORDER BY task_id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_by_run_and_status(
        &self,
        run_id: &str,
        statuses: &[TaskStatus],
    ) -> DomainResult<Vec<TaskRecord>> {
        // Small, fixed status sets; an IN clause built by hand is fine.
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM tasks WHERE run_id = ? AND status IN ({placeholders}) ORDER BY task_id"
        );
        let mut query = sqlx::query(&sql).bind(run_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_stale(
        &self,
        statuses: &[TaskStatus],
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<TaskRecord>> {
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM tasks WHERE status IN ({placeholders}) \
             AND sla_violated_at IS NULL \
             AND COALESCE(started_at, queued_at, created_at) < ?"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_by_status(&self, run_id: &str) -> DomainResult<HashMap<TaskStatus, u64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM tasks WHERE run_id = ? GROUP BY status",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.get("status");
            let Some(status) = TaskStatus::from_str(&status_str) else {
                continue;
            };
            counts.insert(status, row.get::<i64, _>("count") as u64);
        }
        Ok(counts)
    }
}
