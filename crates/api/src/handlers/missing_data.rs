use axum::extract::{Query, State};
use serde::Deserialize;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 缺数审计查询参数
#[derive(Debug, Deserialize)]
pub struct MissingDataQueryParams {
    pub days: Option<i64>,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct DetectQueryParams {
    pub days: Option<i64>,
}

/// 查询缺数汇总，TTL内命中缓存
pub async fn get_missing_data(
    State(state): State<AppState>,
    Query(params): Query<MissingDataQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let summary = state
        .auditor
        .summary(params.days, params.force_refresh)
        .await?;
    Ok(success(summary))
}

/// 强制重新扫描并刷新缓存
pub async fn detect_missing_data(
    State(state): State<AppState>,
    Query(params): Query<DetectQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let summary = state.auditor.trigger_detection(params.days).await?;
    Ok(success(summary))
}
