use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;

use datasync_domain::entities::PluginGroup;
use datasync_domain::repositories::GroupRepository;
use datasync_domain::{SyncError, SyncResult};

const GROUP_COLUMNS: &str = "id, name, plugin_names, default_task_type, category, \
     is_predefined, is_readonly, created_at, updated_at";

pub struct SqliteGroupRepository {
    pool: SqlitePool,
}

impl SqliteGroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> SyncResult<PluginGroup> {
        let names_json: String = row.try_get("plugin_names")?;

        Ok(PluginGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            plugin_names: serde_json::from_str(&names_json)?,
            default_task_type: row.try_get("default_task_type")?,
            category: row.try_get("category")?,
            is_predefined: row.try_get("is_predefined")?,
            is_readonly: row.try_get("is_readonly")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl GroupRepository for SqliteGroupRepository {
    async fn create(&self, group: &PluginGroup) -> SyncResult<PluginGroup> {
        sqlx::query(
            r#"
            INSERT INTO plugin_groups
                (id, name, plugin_names, default_task_type, category, is_predefined,
                 is_readonly, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(serde_json::to_string(&group.plugin_names)?)
        .bind(group.default_task_type)
        .bind(&group.category)
        .bind(group.is_predefined)
        .bind(group.is_readonly)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                SyncError::invalid_params(format!("分组名称已存在: {}", group.name))
            }
            other => SyncError::from(other),
        })?;

        Ok(group.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<PluginGroup>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM plugin_groups WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn list(&self, category: Option<&str>) -> SyncResult<Vec<PluginGroup>> {
        let rows = if let Some(category) = category {
            sqlx::query(&format!(
                "SELECT {GROUP_COLUMNS} FROM plugin_groups WHERE category = ? \
                 ORDER BY is_predefined DESC, created_at ASC"
            ))
            .bind(category)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {GROUP_COLUMNS} FROM plugin_groups \
                 ORDER BY is_predefined DESC, created_at ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(Self::row_to_group).collect()
    }

    async fn update(&self, group: &PluginGroup) -> SyncResult<PluginGroup> {
        // 只读分组在服务层已拦截，这里只做普通字段更新
        let result = sqlx::query(
            r#"
            UPDATE plugin_groups
            SET name = ?, plugin_names = ?, default_task_type = ?, category = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&group.name)
        .bind(serde_json::to_string(&group.plugin_names)?)
        .bind(group.default_task_type)
        .bind(&group.category)
        .bind(Utc::now())
        .bind(&group.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::group_not_found(&group.id));
        }

        self.get_by_id(&group.id)
            .await?
            .ok_or_else(|| SyncError::group_not_found(&group.id))
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let result = sqlx::query("DELETE FROM plugin_groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::group_not_found(id));
        }
        Ok(())
    }

    async fn seed_predefined(&self, groups: &[PluginGroup]) -> SyncResult<()> {
        // 按名称幂等：已存在的预置分组不覆盖用户可能的手工调整
        let mut seeded = 0u32;
        for group in groups {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO plugin_groups
                    (id, name, plugin_names, default_task_type, category, is_predefined,
                     is_readonly, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&group.id)
            .bind(&group.name)
            .bind(serde_json::to_string(&group.plugin_names)?)
            .bind(group.default_task_type)
            .bind(&group.category)
            .bind(group.is_predefined)
            .bind(group.is_readonly)
            .bind(group.created_at)
            .bind(group.updated_at)
            .execute(&self.pool)
            .await?;
            seeded += result.rows_affected() as u32;
        }

        if seeded > 0 {
            info!("预置插件分组落库完成，新增 {} 个", seeded);
        }
        Ok(())
    }
}
