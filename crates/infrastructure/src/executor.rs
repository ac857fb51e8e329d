//! 内置插件执行器
//!
//! 向数仓目标表写入确定性样例数据，满足按日期分区幂等的约定：
//! 先清空当日分区再整批写入。真实数据源接入时以同一trait替换。

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;
use tracing::debug;

use datasync_domain::entities::{Plugin, SyncTaskType};
use datasync_domain::ports::PluginExecutor;
use datasync_domain::SyncResult;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct WarehousePluginExecutor {
    pool: SqlitePool,
}

impl WarehousePluginExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 行数由插件名和日期确定，重复执行结果一致
    fn row_count(plugin: &Plugin, date: NaiveDate) -> u64 {
        let name_sum: u64 = plugin.name.bytes().map(u64::from).sum();
        (name_sum + u64::from(date.ordinal())) % 50 + 10
    }

    fn sample_value(column_type: &str, row: u64) -> String {
        if column_type.eq_ignore_ascii_case("text") {
            format!("'sample_{row}'")
        } else {
            format!("{}", row * 100)
        }
    }
}

#[async_trait]
impl PluginExecutor for WarehousePluginExecutor {
    async fn sync_date(
        &self,
        plugin: &Plugin,
        task_type: SyncTaskType,
        date: NaiveDate,
    ) -> SyncResult<u64> {
        let table = &plugin.table_name;
        let date_str = date.format(DATE_FORMAT).to_string();

        let delete_sql = format!("DELETE FROM {table} WHERE trade_date = ?");
        sqlx::query(&delete_sql)
            .bind(&date_str)
            .execute(&self.pool)
            .await?;

        let extra_columns: Vec<&str> = plugin
            .table_schema
            .iter()
            .filter(|c| c.name != "trade_date")
            .map(|c| c.name.as_str())
            .collect();

        let rows = Self::row_count(plugin, date);
        for row in 0..rows {
            let mut columns = vec!["trade_date".to_string()];
            let mut values = vec![format!("'{date_str}'")];
            for col in &plugin.table_schema {
                if col.name == "trade_date" {
                    continue;
                }
                columns.push(col.name.clone());
                values.push(Self::sample_value(&col.data_type, row));
            }
            let insert_sql = format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            );
            sqlx::query(&insert_sql).execute(&self.pool).await?;
        }

        debug!(
            "Synced {} rows into {} for {} ({:?}, {} extra columns)",
            rows,
            table,
            date_str,
            task_type,
            extra_columns.len()
        );
        Ok(rows)
    }
}
