use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use datasync_domain::entities::PluginRole;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 插件列表查询参数
#[derive(Debug, Deserialize)]
pub struct PluginQueryParams {
    pub category: Option<String>,
    pub role: Option<PluginRole>,
}

/// 插件启停请求
#[derive(Debug, Deserialize)]
pub struct UpdatePluginRequest {
    pub enabled: Option<bool>,
    pub schedule_enabled: Option<bool>,
}

/// 单个依赖的就绪状态
#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub kind: &'static str,
    pub satisfied: bool,
    pub missing_dates: Vec<NaiveDate>,
}

/// 依赖检查结果：硬依赖全部就绪才算满足
#[derive(Debug, Serialize)]
pub struct DependencyCheckResult {
    pub plugin_name: String,
    pub satisfied: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Serialize)]
pub struct DependencyGraphResponse {
    pub graph: HashMap<String, Vec<String>>,
    pub reverse_graph: HashMap<String, Vec<String>>,
}

/// 按声明顺序列出插件，支持分类/角色过滤
pub async fn list_plugins(
    State(state): State<AppState>,
    Query(params): Query<PluginQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let plugins = state
        .registry
        .list(params.category.as_deref(), params.role)
        .await;
    Ok(success(plugins))
}

/// 插件启停与调度开关
pub async fn update_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdatePluginRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.enabled.is_none() && request.schedule_enabled.is_none() {
        return Err(ApiError::BadRequest(
            "enabled 和 schedule_enabled 至少提供一个".to_string(),
        ));
    }
    let mut plugin = state.registry.require(&name).await?;
    if let Some(enabled) = request.enabled {
        plugin = state.registry.set_enabled(&name, enabled).await?;
    }
    if let Some(enabled) = request.schedule_enabled {
        plugin = state.registry.set_schedule_enabled(&name, enabled).await?;
    }
    Ok(success(plugin))
}

/// 检查插件依赖在最近交易日的数据就绪状态
pub async fn plugin_dependencies(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let plugin = state.registry.require(&name).await?;
    let graph = state.registry.graph();

    let mut dependencies = Vec::new();
    let mut satisfied = true;
    for (kind, deps) in [
        ("hard", graph.hard_dependencies(&plugin.name)),
        ("optional", graph.optional_dependencies(&plugin.name)),
    ] {
        for dep in deps {
            let check = state.scheduler.check_data_exists(dep, &[]).await?;
            let dep_satisfied = check.all_exist();
            if kind == "hard" && !dep_satisfied {
                satisfied = false;
            }
            dependencies.push(DependencyStatus {
                name: dep.clone(),
                kind,
                satisfied: dep_satisfied,
                missing_dates: check.missing,
            });
        }
    }

    Ok(success(DependencyCheckResult {
        plugin_name: plugin.name,
        satisfied,
        dependencies,
    }))
}

/// 导出硬依赖的正反向邻接表
pub async fn dependency_graph(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let graph = state.registry.graph();
    Ok(success(DependencyGraphResponse {
        graph: graph.forward_adjacency(),
        reverse_graph: graph.reverse_adjacency(),
    }))
}
