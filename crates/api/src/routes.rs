use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use datasync_dispatcher::{MissingDataAuditor, SyncScheduler};
use datasync_domain::repositories::{
    ConfigRepository, ExecutionRepository, GroupRepository, TaskRepository,
};
use datasync_registry::PluginRegistry;

use crate::handlers::{
    groups::{
        check_group_exists, create_group, delete_group, get_group, list_groups, trigger_group,
        update_group,
    },
    health::health_check,
    missing_data::{detect_missing_data, get_missing_data},
    plugins::{dependency_graph, list_plugins, plugin_dependencies, update_plugin},
    schedule::{
        get_execution, get_schedule_config, list_history, partial_retry_execution,
        retry_execution, schedule_plugins, stop_execution, trigger_schedule,
        update_plugin_schedule, update_schedule_config,
    },
    sync::{
        cancel_task, delete_task, get_sync_config, get_task, list_tasks, retry_task,
        trigger_batch, trigger_sync, update_sync_config,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SyncScheduler>,
    pub auditor: Arc<MissingDataAuditor>,
    pub registry: Arc<PluginRegistry>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub execution_repo: Arc<dyn ExecutionRepository>,
    pub group_repo: Arc<dyn GroupRepository>,
    pub config_repo: Arc<dyn ConfigRepository>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 同步触发与任务管理
        .route("/api/sync/trigger", post(trigger_sync))
        .route("/api/sync/batch", post(trigger_batch))
        .route("/api/sync/tasks", get(list_tasks))
        .route("/api/sync/tasks/{task_id}", get(get_task).delete(delete_task))
        .route("/api/sync/cancel/{task_id}", post(cancel_task))
        .route("/api/sync/retry/{task_id}", post(retry_task))
        .route("/api/sync/config", get(get_sync_config).put(update_sync_config))
        // 插件目录与依赖
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/dependency-graph", get(dependency_graph))
        .route("/api/plugins/{name}", put(update_plugin))
        .route("/api/plugins/{name}/dependencies", get(plugin_dependencies))
        // 定时调度与执行记录
        .route(
            "/api/schedule/config",
            get(get_schedule_config).put(update_schedule_config),
        )
        .route("/api/schedule/plugins", get(schedule_plugins))
        .route("/api/schedule/plugins/{name}", put(update_plugin_schedule))
        .route("/api/schedule/trigger", post(trigger_schedule))
        .route("/api/schedule/retry/{execution_id}", post(retry_execution))
        .route(
            "/api/schedule/partial-retry/{execution_id}",
            post(partial_retry_execution),
        )
        .route("/api/schedule/stop/{execution_id}", post(stop_execution))
        .route("/api/schedule/history", get(list_history))
        .route("/api/schedule/execution/{execution_id}", get(get_execution))
        // 插件分组
        .route("/api/groups", get(list_groups).post(create_group))
        .route(
            "/api/groups/{id}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/api/groups/{id}/trigger", post(trigger_group))
        .route("/api/groups/{id}/check-exists", post(check_group_exists))
        // 缺数审计
        .route("/api/missing-data", get(get_missing_data))
        .route("/api/missing-data/detect", post(detect_missing_data))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
