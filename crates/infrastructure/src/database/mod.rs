//! SQLite任务库：连接池与迁移

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

use datasync_domain::SyncResult;

pub mod config_store;
pub mod execution_store;
pub mod group_store;
pub mod task_store;

pub use config_store::SqliteConfigRepository;
pub use execution_store::SqliteExecutionRepository;
pub use group_store::SqliteGroupRepository;
pub use task_store::SqliteTaskRepository;

/// 创建嵌入式SQLite连接池并完成建表，启用外键约束和WAL模式
pub async fn create_pool(database_url: &str, max_connections: u32) -> SyncResult<SqlitePool> {
    debug!("Creating embedded SQLite pool at: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> SyncResult<()> {
    debug!("Running SQLite database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_tasks (
            id TEXT PRIMARY KEY,
            plugin_name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            records_processed INTEGER NOT NULL DEFAULT 0,
            total_records INTEGER NOT NULL DEFAULT 0,
            trade_dates TEXT NOT NULL DEFAULT '[]',
            dependencies_satisfied INTEGER NOT NULL DEFAULT 1,
            force_overwrite INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            execution_id TEXT,
            created_at DATETIME NOT NULL,
            started_at DATETIME,
            completed_at DATETIME
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_records (
            id TEXT PRIMARY KEY,
            trigger_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            skip_reason TEXT,
            total_plugins INTEGER NOT NULL DEFAULT 0,
            completed_plugins INTEGER NOT NULL DEFAULT 0,
            failed_plugins INTEGER NOT NULL DEFAULT 0,
            task_ids TEXT NOT NULL DEFAULT '[]',
            execution_order TEXT NOT NULL DEFAULT '[]',
            can_retry INTEGER NOT NULL DEFAULT 0,
            group_name TEXT,
            parent_execution_id TEXT,
            started_at DATETIME NOT NULL,
            completed_at DATETIME
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plugin_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            plugin_names TEXT NOT NULL DEFAULT '[]',
            default_task_type TEXT NOT NULL DEFAULT 'incremental',
            category TEXT NOT NULL DEFAULT 'custom',
            is_predefined INTEGER NOT NULL DEFAULT 0,
            is_readonly INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_status ON sync_tasks(status)",
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_plugin ON sync_tasks(plugin_name)",
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_execution ON sync_tasks(execution_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_created_at ON sync_tasks(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_execution_records_started_at ON execution_records(started_at)",
        "CREATE INDEX IF NOT EXISTS idx_execution_records_status ON execution_records(status)",
    ];
    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
