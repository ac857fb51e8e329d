//! 嵌入式列存数仓适配器
//!
//! 用独立的SQLite库承载各插件的目标表，trade_date列即分区键。
//! 编排器只依赖存在性/水位查询，写入走PluginExecutor。

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use datasync_domain::entities::{ColumnDef, DataExistsResult, Plugin};
use datasync_domain::ports::Warehouse;
use datasync_domain::{SyncError, SyncResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteWarehouse {
    pool: SqlitePool,
}

impl SqliteWarehouse {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn check_table_name(table: &str) -> SyncResult<()> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(SyncError::invalid_params(format!("表名非法: {table}")));
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn data_exists(&self, table: &str, dates: &[NaiveDate]) -> SyncResult<DataExistsResult> {
        Self::check_table_name(table)?;

        if !self.table_exists(table).await? {
            return Ok(DataExistsResult {
                existing: Vec::new(),
                missing: dates.to_vec(),
            });
        }

        let mut result = DataExistsResult::default();
        for &date in dates {
            let sql = format!("SELECT COUNT(*) AS cnt FROM {table} WHERE trade_date = ?");
            let row = sqlx::query(&sql)
                .bind(date.format(DATE_FORMAT).to_string())
                .fetch_one(&self.pool)
                .await?;
            let count: i64 = row.try_get("cnt")?;
            if count > 0 {
                result.existing.push(date);
            } else {
                result.missing.push(date);
            }
        }
        Ok(result)
    }

    async fn latest_date(&self, table: &str) -> SyncResult<Option<NaiveDate>> {
        Self::check_table_name(table)?;

        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let sql = format!("SELECT MAX(trade_date) AS latest FROM {table}");
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let latest: Option<String> = row.try_get("latest")?;

        latest
            .map(|s| {
                NaiveDate::parse_from_str(&s, DATE_FORMAT)
                    .map_err(|e| SyncError::Internal(format!("数仓日期格式异常: {s} ({e})")))
            })
            .transpose()
    }

    async fn describe_table(&self, table: &str) -> SyncResult<Vec<ColumnDef>> {
        Self::check_table_name(table)?;

        let sql = format!("PRAGMA table_info({table})");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(SyncError::invalid_params(format!("数据表不存在: {table}")));
        }

        rows.iter()
            .map(|row| {
                Ok(ColumnDef {
                    name: row.try_get("name")?,
                    data_type: row.try_get("type")?,
                })
            })
            .collect()
    }

    async fn ensure_table(&self, plugin: &Plugin) -> SyncResult<()> {
        Self::check_table_name(&plugin.table_name)?;

        let mut columns: Vec<String> = vec!["trade_date TEXT NOT NULL".to_string()];
        for col in &plugin.table_schema {
            if col.name == "trade_date" {
                continue;
            }
            Self::check_table_name(&col.name)?;
            columns.push(format!("{} {}", col.name, col.data_type));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            plugin.table_name,
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        let index_sql = format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_trade_date ON {0}(trade_date)",
            plugin.table_name
        );
        sqlx::query(&index_sql).execute(&self.pool).await?;

        debug!("Ensured warehouse table: {}", plugin.table_name);
        Ok(())
    }
}
