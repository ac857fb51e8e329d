use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use datasync_domain::entities::{SyncTask, SyncTaskStatus, TaskFilter};
use datasync_domain::repositories::TaskRepository;
use datasync_domain::{SyncError, SyncResult};

const TASK_COLUMNS: &str = "id, plugin_name, task_type, status, progress, records_processed, \
     total_records, trade_dates, dependencies_satisfied, force_overwrite, error_message, \
     execution_id, created_at, started_at, completed_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SyncResult<SyncTask> {
        let dates_json: String = row.try_get("trade_dates")?;
        let trade_dates: Vec<NaiveDate> = serde_json::from_str(&dates_json)?;

        Ok(SyncTask {
            id: row.try_get("id")?,
            plugin_name: row.try_get("plugin_name")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            progress: row.try_get("progress")?,
            records_processed: row.try_get("records_processed")?,
            total_records: row.try_get("total_records")?,
            trade_dates,
            dependencies_satisfied: row.try_get("dependencies_satisfied")?,
            force_overwrite: row.try_get("force_overwrite")?,
            error_message: row.try_get("error_message")?,
            execution_id: row.try_get("execution_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn status_in_clause(statuses: &[SyncTaskStatus]) -> String {
        let quoted: Vec<String> = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
        quoted.join(", ")
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        let dates_json = serde_json::to_string(&task.trade_dates)?;

        sqlx::query(
            r#"
            INSERT INTO sync_tasks
                (id, plugin_name, task_type, status, progress, records_processed, total_records,
                 trade_dates, dependencies_satisfied, force_overwrite, error_message, execution_id,
                 created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.plugin_name)
        .bind(task.task_type)
        .bind(task.status)
        .bind(task.progress)
        .bind(task.records_processed)
        .bind(task.total_records)
        .bind(dates_json)
        .bind(task.dependencies_satisfied)
        .bind(task.force_overwrite)
        .bind(&task.error_message)
        .bind(&task.execution_id)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;

        debug!("创建同步任务: {}", task.entity_description());
        Ok(task.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<SyncTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> SyncResult<(Vec<SyncTask>, i64)> {
        let mut where_clause = String::from(" WHERE 1=1");
        if filter.status.is_some() {
            where_clause.push_str(" AND status = ?");
        }
        if filter.plugin_name.is_some() {
            where_clause.push_str(" AND plugin_name = ?");
        }
        if filter.execution_id.is_some() {
            where_clause.push_str(" AND execution_id = ?");
        }

        // 排序字段白名单，其他输入一律回退到created_at
        let sort_by = match filter.sort_by.as_deref() {
            Some(col @ ("created_at" | "started_at" | "completed_at" | "plugin_name" | "status"
            | "progress")) => col,
            _ => "created_at",
        };
        let sort_order = match filter.sort_order.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        };

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 200);
        let offset = (page - 1) * page_size;

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM sync_tasks{where_clause}");
        let mut count_query = sqlx::query(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
        }
        if let Some(plugin_name) = &filter.plugin_name {
            count_query = count_query.bind(plugin_name);
        }
        if let Some(execution_id) = &filter.execution_id {
            count_query = count_query.bind(execution_id);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.try_get("cnt")?;

        let list_sql = format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks{where_clause} \
             ORDER BY {sort_by} {sort_order} LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(status) = filter.status {
            list_query = list_query.bind(status);
        }
        if let Some(plugin_name) = &filter.plugin_name {
            list_query = list_query.bind(plugin_name);
        }
        if let Some(execution_id) = &filter.execution_id {
            list_query = list_query.bind(execution_id);
        }
        let rows = list_query
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let tasks: SyncResult<Vec<SyncTask>> = rows.iter().map(Self::row_to_task).collect();
        Ok((tasks?, total))
    }

    async fn get_by_execution(&self, execution_id: &str) -> SyncResult<Vec<SyncTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks WHERE execution_id = ? ORDER BY created_at ASC"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_status(&self, status: SyncTaskStatus) -> SyncResult<Vec<SyncTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn transition(
        &self,
        id: &str,
        new_status: SyncTaskStatus,
        error_message: Option<&str>,
    ) -> SyncResult<SyncTask> {
        let sources = SyncTaskStatus::legal_sources(new_status);
        let now = Utc::now();

        // 单行CAS：WHERE限定合法源状态，零行命中即非法迁移
        let result = if sources.is_empty() {
            None
        } else {
            let sql = format!(
                r#"
                UPDATE sync_tasks
                SET status = ?1,
                    error_message = COALESCE(?2, error_message),
                    started_at = CASE
                        WHEN ?1 = 'running' AND started_at IS NULL THEN ?3
                        ELSE started_at END,
                    completed_at = CASE
                        WHEN ?1 IN ('completed', 'failed', 'cancelled') THEN ?3
                        ELSE completed_at END,
                    progress = CASE WHEN ?1 = 'completed' THEN 100 ELSE progress END
                WHERE id = ?4 AND status IN ({})
                "#,
                Self::status_in_clause(sources)
            );
            Some(
                sqlx::query(&sql)
                    .bind(new_status)
                    .bind(error_message)
                    .bind(now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?,
            )
        };

        let updated = matches!(&result, Some(r) if r.rows_affected() > 0);
        if !updated {
            return match self.get_by_id(id).await? {
                Some(task) => Err(SyncError::InvalidTransition {
                    task_id: id.to_string(),
                    from: task.status,
                    to: new_status,
                }),
                None => Err(SyncError::task_not_found(id)),
            };
        }

        self.get_by_id(id)
            .await?
            .ok_or_else(|| SyncError::task_not_found(id))
    }

    async fn update_progress(
        &self,
        id: &str,
        progress: i32,
        records_processed: i64,
        total_records: i64,
    ) -> SyncResult<()> {
        // MAX保证运行中进度单调不减；非running状态下静默忽略
        sqlx::query(
            r#"
            UPDATE sync_tasks
            SET progress = MAX(progress, MIN(?, 100)),
                records_processed = ?,
                total_records = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(progress)
        .bind(records_processed)
        .bind(total_records)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_dependencies_satisfied(&self, id: &str, satisfied: bool) -> SyncResult<()> {
        sqlx::query("UPDATE sync_tasks SET dependencies_satisfied = ? WHERE id = ?")
            .bind(satisfied)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let result = sqlx::query(
            "DELETE FROM sync_tasks WHERE id = ? AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(id).await? {
                Some(_) => Err(SyncError::invalid_params("只能删除终态任务")),
                None => Err(SyncError::task_not_found(id)),
            };
        }
        Ok(())
    }
}
