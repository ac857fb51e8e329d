//! 应用装配
//!
//! 单进程部署：SQLite池、插件注册表、调度器、缺数审计、
//! 定时循环和HTTP服务在这里接线。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use datasync_api::{create_routes, AppState};
use datasync_dispatcher::{
    ConcurrencyController, MissingDataAuditor, ScheduleLoop, SyncScheduler, TaskRunner,
};
use datasync_domain::repositories::{ConfigRepository, GroupRepository};
use datasync_infrastructure::{
    create_pool, SqliteConfigRepository, SqliteExecutionRepository, SqliteGroupRepository,
    SqliteTaskRepository, SqliteWarehouse, WarehousePluginExecutor, WeekdayCalendar,
};
use datasync_registry::{builtin_catalog, predefined_groups, PluginRegistry};

use crate::config::AppConfig;

pub struct Application {
    config: AppConfig,
    state: AppState,
    scheduler: Arc<SyncScheduler>,
    config_repo: Arc<dyn ConfigRepository>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = create_pool(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("初始化数据库失败: {}", config.database.url))?;

        let registry = Arc::new(PluginRegistry::load(builtin_catalog())?);
        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let execution_repo = Arc::new(SqliteExecutionRepository::new(pool.clone()));
        let group_repo = Arc::new(SqliteGroupRepository::new(pool.clone()));
        let config_repo: Arc<dyn ConfigRepository> =
            Arc::new(SqliteConfigRepository::new(pool.clone()));
        let warehouse = Arc::new(SqliteWarehouse::new(pool.clone()));
        let calendar = Arc::new(WeekdayCalendar::new());
        let executor = Arc::new(WarehousePluginExecutor::new(pool.clone()));

        let runner = Arc::new(TaskRunner::new(
            task_repo.clone(),
            warehouse.clone(),
            executor,
        ));
        let sync_config = config_repo.get_sync_config().await?;
        let concurrency = Arc::new(ConcurrencyController::new(sync_config.max_concurrent_tasks));

        let scheduler = Arc::new(SyncScheduler::new(
            registry.clone(),
            task_repo.clone(),
            execution_repo.clone(),
            group_repo.clone(),
            config_repo.clone(),
            warehouse.clone(),
            calendar.clone(),
            runner,
            concurrency,
        ));
        let auditor = Arc::new(MissingDataAuditor::new(
            registry.clone(),
            warehouse.clone(),
            calendar,
            Duration::from_secs(config.auditor.cache_ttl_seconds),
        ));

        // 预置分组幂等落库，重启遗留的非终态任务收尾
        group_repo.seed_predefined(&predefined_groups()).await?;
        scheduler.recover_interrupted().await?;

        let state = AppState {
            scheduler: scheduler.clone(),
            auditor,
            registry,
            task_repo,
            execution_repo,
            group_repo,
            config_repo: config_repo.clone(),
        };

        Ok(Self {
            config,
            state,
            scheduler,
            config_repo,
        })
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let schedule_loop =
            ScheduleLoop::new(self.scheduler.clone(), self.config_repo.clone());
        let loop_shutdown = shutdown.clone();
        tokio::spawn(async move {
            schedule_loop.run(loop_shutdown).await;
        });

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "监听地址无效: {}:{}",
                    self.config.server.host, self.config.server.port
                )
            })?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("绑定端口失败: {addr}"))?;
        info!("HTTP服务监听 {}", addr);

        let router = create_routes(self.state.clone());
        let mut http_shutdown = shutdown;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                if http_shutdown.changed().await.is_err() {
                    error!("关闭通道已断开");
                }
            })
            .await
            .context("HTTP服务异常退出")?;

        info!("HTTP服务已停止");
        Ok(())
    }
}
