use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use datasync_domain::entities::{
    ExecutionRecord, SyncConfig, SyncTask, SyncTaskStatus, SyncTaskType, TaskFilter,
    TriggerSyncRequest,
};
use datasync_domain::SyncError;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, no_content, success, PaginatedResponse},
    routes::AppState,
};

/// 批量触发请求
#[derive(Debug, Deserialize)]
pub struct BatchSyncRequest {
    pub plugin_names: Vec<String>,
    pub task_type: SyncTaskType,
    #[serde(default)]
    pub trade_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub force_overwrite: bool,
    /// 是否把依赖一并展开
    #[serde(default = "default_true")]
    pub expand_dependencies: bool,
    /// 展开时是否包含可选依赖，缺省跟随调度配置
    #[serde(default)]
    pub include_optional: Option<bool>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct BatchSyncResponse {
    pub execution_id: String,
    pub total_plugins: i64,
    pub execution_order: Vec<String>,
    pub tasks: Vec<SyncTask>,
}

/// 任务列表查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<SyncTaskStatus>,
    pub plugin_name: Option<String>,
    pub execution_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 单插件触发，数据已存在且未要求覆盖时返回合成完成任务
pub async fn trigger_sync(
    State(state): State<AppState>,
    Json(request): Json<TriggerSyncRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state.scheduler.trigger_single(&request).await?;
    let task_id = record
        .task_ids
        .first()
        .ok_or_else(|| ApiError::Internal("触发后未找到任务".to_string()))?;
    let task = state
        .task_repo
        .get_by_id(task_id)
        .await?
        .ok_or_else(|| SyncError::task_not_found(task_id))?;
    Ok(created(task))
}

/// 批量触发，返回执行顺序和创建的任务
pub async fn trigger_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchSyncRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record: ExecutionRecord = state
        .scheduler
        .trigger_batch(
            &request.plugin_names,
            request.task_type,
            &request.trade_dates,
            request.force_overwrite,
            request.expand_dependencies,
            request.include_optional,
        )
        .await?;
    let tasks = state.task_repo.get_by_execution(&record.id).await?;
    Ok(created(BatchSyncResponse {
        execution_id: record.id,
        total_plugins: record.total_plugins,
        execution_order: record.execution_order,
        tasks,
    }))
}

/// 分页查询任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(20);
    let filter = TaskFilter {
        status: params.status,
        plugin_name: params.plugin_name,
        execution_id: params.execution_id,
        sort_by: params.sort_by,
        sort_order: params.sort_order,
        page,
        page_size,
    };
    let (tasks, total) = state.task_repo.list(&filter).await?;
    Ok(success(PaginatedResponse::new(
        tasks, total, page, page_size,
    )))
}

/// 查询单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state
        .task_repo
        .get_by_id(&task_id)
        .await?
        .ok_or_else(|| SyncError::task_not_found(&task_id))?;
    Ok(success(task))
}

/// 取消任务：pending立即取消，running置协作标志
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.scheduler.cancel_task(&task_id).await?;
    Ok(success(task))
}

/// 删除终态任务
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.scheduler.delete_task(&task_id).await?;
    Ok(no_content())
}

/// 以原任务参数重试失败/已取消的任务
pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state.scheduler.retry_task(&task_id).await?;
    Ok(created(record))
}

/// 查询并发预算配置
pub async fn get_sync_config(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let config = state.config_repo.get_sync_config().await?;
    Ok(success(config))
}

/// 更新并发预算，立即对信号量生效
pub async fn update_sync_config(
    State(state): State<AppState>,
    Json(config): Json<SyncConfig>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.scheduler.update_sync_config(&config).await?;
    Ok(success(config))
}
