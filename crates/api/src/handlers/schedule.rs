use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use datasync_domain::entities::{
    ExecutionFilter, ExecutionRecord, ExecutionStatus, PluginSchedule, ScheduleConfig,
    ScheduleFrequency, SyncTask, TriggerType,
};
use datasync_domain::SyncError;

use crate::{
    error::ApiResult,
    response::{accepted, created, success},
    routes::AppState,
};

/// 插件调度配置更新请求
#[derive(Debug, Deserialize)]
pub struct UpdatePluginScheduleRequest {
    pub schedule_enabled: Option<bool>,
    pub frequency: Option<ScheduleFrequency>,
    pub time: Option<String>,
}

/// 部分重试请求，缺省重试原执行内全部失败的插件
#[derive(Debug, Deserialize)]
pub struct PartialRetryRequest {
    #[serde(default)]
    pub plugin_names: Option<Vec<String>>,
}

/// 执行历史查询参数
#[derive(Debug, Deserialize)]
pub struct HistoryQueryParams {
    pub days: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ExecutionStatus>,
    pub trigger_type: Option<TriggerType>,
}

#[derive(Debug, Deserialize)]
pub struct SchedulePluginQueryParams {
    pub category: Option<String>,
}

/// 执行记录详情：记录 + 所属任务
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    pub record: ExecutionRecord,
    pub tasks: Vec<SyncTask>,
}

pub async fn get_schedule_config(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let config = state.config_repo.get_schedule_config().await?;
    Ok(success(config))
}

pub async fn update_schedule_config(
    State(state): State<AppState>,
    Json(config): Json<ScheduleConfig>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.config_repo.update_schedule_config(&config).await?;
    Ok(success(config))
}

/// 列出插件的调度配置
pub async fn schedule_plugins(
    State(state): State<AppState>,
    Query(params): Query<SchedulePluginQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let plugins = state.registry.list(params.category.as_deref(), None).await;
    Ok(success(plugins))
}

/// 更新单插件的调度开关与执行时间
pub async fn update_plugin_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdatePluginScheduleRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut plugin = state.registry.require(&name).await?;

    if request.frequency.is_some() || request.time.is_some() {
        let schedule = PluginSchedule {
            frequency: request.frequency.unwrap_or(plugin.schedule.frequency),
            time: request.time.unwrap_or_else(|| plugin.schedule.time.clone()),
        };
        plugin = state.registry.update_schedule(&name, schedule).await?;
    }
    if let Some(enabled) = request.schedule_enabled {
        plugin = state.registry.set_schedule_enabled(&name, enabled).await?;
    }
    Ok(success(plugin))
}

/// 手动触发一轮定时调度
pub async fn trigger_schedule(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state.scheduler.trigger_schedule().await?;
    Ok(created(record))
}

/// 重试执行内全部失败的插件
pub async fn retry_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state.scheduler.partial_retry(&execution_id, None).await?;
    Ok(created(record))
}

/// 重试执行内指定的插件子集
pub async fn partial_retry_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(request): Json<PartialRetryRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state
        .scheduler
        .partial_retry(&execution_id, request.plugin_names.as_deref())
        .await?;
    Ok(created(record))
}

/// 协作式停止一次执行
pub async fn stop_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.scheduler.stop(&execution_id).await?;
    Ok(accepted())
}

/// 按时间窗口/状态/触发类型过滤执行历史
pub async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = ExecutionFilter {
        days: params.days,
        limit: params.limit,
        status: params.status,
        trigger_type: params.trigger_type,
    };
    let records = state.execution_repo.list_history(&filter).await?;
    Ok(success(records))
}

/// 执行记录详情
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state
        .execution_repo
        .get_by_id(&execution_id)
        .await?
        .ok_or_else(|| SyncError::execution_not_found(&execution_id))?;
    let tasks = state.task_repo.get_by_execution(&execution_id).await?;
    Ok(success(ExecutionDetail { record, tasks }))
}
