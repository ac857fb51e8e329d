use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use datasync_domain::entities::{ScheduleConfig, SyncConfig};
use datasync_domain::repositories::ConfigRepository;
use datasync_domain::{SyncError, SyncResult};

const SYNC_CONFIG_KEY: &str = "sync_config";
const SCHEDULE_CONFIG_KEY: &str = "schedule_config";

/// 运行配置以JSON文档形式存放在system_state键值表，缺失时返回默认值
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_value(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM system_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value")).transpose().map_err(SyncError::from)
    }

    async fn put_value(&self, key: &str, value: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO system_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Persisted system state key: {}", key);
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    async fn get_sync_config(&self) -> SyncResult<SyncConfig> {
        match self.get_value(SYNC_CONFIG_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SyncConfig::default()),
        }
    }

    async fn update_sync_config(&self, config: &SyncConfig) -> SyncResult<()> {
        config
            .validate()
            .map_err(SyncError::invalid_params)?;
        self.put_value(SYNC_CONFIG_KEY, &serde_json::to_string(config)?)
            .await
    }

    async fn get_schedule_config(&self) -> SyncResult<ScheduleConfig> {
        match self.get_value(SCHEDULE_CONFIG_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(ScheduleConfig::default()),
        }
    }

    async fn update_schedule_config(&self, config: &ScheduleConfig) -> SyncResult<()> {
        config.validate().map_err(SyncError::invalid_params)?;
        self.put_value(SCHEDULE_CONFIG_KEY, &serde_json::to_string(config)?)
            .await
    }
}
