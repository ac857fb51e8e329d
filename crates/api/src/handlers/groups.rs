use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use datasync_domain::entities::{PluginGroup, SyncTaskType};
use datasync_domain::SyncError;

use crate::{
    error::ApiResult,
    response::{created, no_content, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct GroupQueryParams {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub plugin_names: Vec<String>,
    pub default_task_type: SyncTaskType,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub plugin_names: Option<Vec<String>>,
    pub default_task_type: Option<SyncTaskType>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerGroupRequest {
    #[serde(default)]
    pub trade_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub force_overwrite: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckExistsRequest {
    #[serde(default)]
    pub trade_dates: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct PluginDataExists {
    pub plugin_name: String,
    pub existing: Vec<NaiveDate>,
    pub missing: Vec<NaiveDate>,
    pub all_exist: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupDataExistsResponse {
    pub group_id: String,
    pub group_name: String,
    pub results: Vec<PluginDataExists>,
}

/// 预置分组只读，更新和删除都要先过这道闸
fn ensure_writable(group: &PluginGroup) -> Result<(), SyncError> {
    if group.is_predefined || group.is_readonly {
        return Err(SyncError::GroupReadonly {
            name: group.name.clone(),
        });
    }
    Ok(())
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(params): Query<GroupQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let groups = state.group_repo.list(params.category.as_deref()).await?;
    Ok(success(groups))
}

/// 创建自定义分组，插件名逐个校验存在
pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(SyncError::invalid_params("分组名称不能为空").into());
    }
    if request.plugin_names.is_empty() {
        return Err(SyncError::invalid_params("分组必须包含至少一个插件").into());
    }
    for name in &request.plugin_names {
        state.registry.require(name).await?;
    }

    let mut group = PluginGroup::new(
        &request.name,
        request.plugin_names,
        request.default_task_type,
    );
    if let Some(category) = request.category {
        group.category = category;
    }
    let group = state.group_repo.create(&group).await?;
    Ok(created(group))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let group = state
        .group_repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| SyncError::group_not_found(&id))?;
    Ok(success(group))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateGroupRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut group = state
        .group_repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| SyncError::group_not_found(&id))?;
    ensure_writable(&group)?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(SyncError::invalid_params("分组名称不能为空").into());
        }
        group.name = name;
    }
    if let Some(plugin_names) = request.plugin_names {
        if plugin_names.is_empty() {
            return Err(SyncError::invalid_params("分组必须包含至少一个插件").into());
        }
        for name in &plugin_names {
            state.registry.require(name).await?;
        }
        group.plugin_names = plugin_names;
    }
    if let Some(task_type) = request.default_task_type {
        group.default_task_type = task_type;
    }
    if let Some(category) = request.category {
        group.category = category;
    }
    group.updated_at = Utc::now();

    let group = state.group_repo.update(&group).await?;
    Ok(success(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let group = state
        .group_repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| SyncError::group_not_found(&id))?;
    ensure_writable(&group)?;
    state.group_repo.delete(&id).await?;
    Ok(no_content())
}

/// 一键触发分组内全部插件
pub async fn trigger_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TriggerGroupRequest>>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let record = state
        .scheduler
        .trigger_group(&id, &request.trade_dates, request.force_overwrite)
        .await?;
    Ok(created(record))
}

/// 检查分组内各插件在目标日期的数据存在性
pub async fn check_group_exists(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CheckExistsRequest>>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let group = state
        .group_repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| SyncError::group_not_found(&id))?;

    let mut results = Vec::with_capacity(group.plugin_names.len());
    for name in &group.plugin_names {
        let check = state
            .scheduler
            .check_data_exists(name, &request.trade_dates)
            .await?;
        results.push(PluginDataExists {
            plugin_name: name.clone(),
            all_exist: check.all_exist(),
            existing: check.existing,
            missing: check.missing,
        });
    }

    Ok(success(GroupDataExistsResponse {
        group_id: group.id,
        group_name: group.name,
        results,
    }))
}
