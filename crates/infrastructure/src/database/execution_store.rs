use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};

use datasync_domain::entities::{ExecutionFilter, ExecutionRecord, ExecutionStatus};
use datasync_domain::repositories::ExecutionRepository;
use datasync_domain::{SyncError, SyncResult};

const EXECUTION_COLUMNS: &str = "id, trigger_type, status, skip_reason, total_plugins, \
     completed_plugins, failed_plugins, task_ids, execution_order, can_retry, group_name, \
     parent_execution_id, started_at, completed_at";

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> SyncResult<ExecutionRecord> {
        let task_ids_json: String = row.try_get("task_ids")?;
        let order_json: String = row.try_get("execution_order")?;

        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            trigger_type: row.try_get("trigger_type")?,
            status: row.try_get("status")?,
            skip_reason: row.try_get("skip_reason")?,
            total_plugins: row.try_get("total_plugins")?,
            completed_plugins: row.try_get("completed_plugins")?,
            failed_plugins: row.try_get("failed_plugins")?,
            task_ids: serde_json::from_str(&task_ids_json)?,
            execution_order: serde_json::from_str(&order_json)?,
            can_retry: row.try_get("can_retry")?,
            group_name: row.try_get("group_name")?,
            parent_execution_id: row.try_get("parent_execution_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create(&self, record: &ExecutionRecord) -> SyncResult<ExecutionRecord> {
        sqlx::query(
            r#"
            INSERT INTO execution_records
                (id, trigger_type, status, skip_reason, total_plugins, completed_plugins,
                 failed_plugins, task_ids, execution_order, can_retry, group_name,
                 parent_execution_id, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.trigger_type)
        .bind(record.status)
        .bind(&record.skip_reason)
        .bind(record.total_plugins)
        .bind(record.completed_plugins)
        .bind(record.failed_plugins)
        .bind(serde_json::to_string(&record.task_ids)?)
        .bind(serde_json::to_string(&record.execution_order)?)
        .bind(record.can_retry)
        .bind(&record.group_name)
        .bind(&record.parent_execution_id)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(record.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM execution_records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_history(&self, filter: &ExecutionFilter) -> SyncResult<Vec<ExecutionRecord>> {
        let mut where_clause = String::from(" WHERE 1=1");
        if filter.days.is_some() {
            where_clause.push_str(" AND started_at >= ?");
        }
        if filter.status.is_some() {
            where_clause.push_str(" AND status = ?");
        }
        if filter.trigger_type.is_some() {
            where_clause.push_str(" AND trigger_type = ?");
        }

        let limit = filter.limit.unwrap_or(50).clamp(1, 500);
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM execution_records{where_clause} \
             ORDER BY started_at DESC LIMIT ?"
        );

        let mut query = sqlx::query(&sql);
        if let Some(days) = filter.days {
            let since = Utc::now() - Duration::days(days.max(0));
            query = query.bind(since);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(trigger_type) = filter.trigger_type {
            query = query.bind(trigger_type);
        }

        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn increment_completed(&self, id: &str) -> SyncResult<()> {
        let result = sqlx::query(
            "UPDATE execution_records SET completed_plugins = completed_plugins + 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::execution_not_found(id));
        }
        Ok(())
    }

    async fn increment_failed(&self, id: &str) -> SyncResult<()> {
        let result = sqlx::query(
            "UPDATE execution_records SET failed_plugins = failed_plugins + 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::execution_not_found(id));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed: bool,
    ) -> SyncResult<()> {
        let completed_at = completed.then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE execution_records
            SET status = ?, completed_at = COALESCE(?, completed_at)
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::execution_not_found(id));
        }
        Ok(())
    }

    async fn set_can_retry(&self, id: &str, can_retry: bool) -> SyncResult<()> {
        let result = sqlx::query("UPDATE execution_records SET can_retry = ? WHERE id = ?")
            .bind(can_retry)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::execution_not_found(id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let result = sqlx::query("DELETE FROM execution_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::execution_not_found(id));
        }
        Ok(())
    }
}
