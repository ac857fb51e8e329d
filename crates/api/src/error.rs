use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use datasync_domain::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("同步系统错误: {0}")]
    Sync(#[from] SyncError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type, suggestions) = match &self {
            ApiError::Sync(SyncError::PluginNotFound { name }) => (
                StatusCode::NOT_FOUND,
                format!("插件 {} 不存在", name),
                "PLUGIN_NOT_FOUND".to_string(),
                vec![
                    "请检查插件名称是否正确".to_string(),
                    "使用 GET /api/plugins 查看所有可用插件".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("同步任务 {} 不存在", id),
                "TASK_NOT_FOUND".to_string(),
                vec![
                    "请检查任务ID是否正确".to_string(),
                    "使用 GET /api/sync/tasks 查看任务列表".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::ExecutionNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("执行记录 {} 不存在", id),
                "EXECUTION_NOT_FOUND".to_string(),
                vec![
                    "请检查执行记录ID是否正确".to_string(),
                    "使用 GET /api/schedule/history 查看执行历史".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::GroupNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("插件分组 {} 不存在", id),
                "GROUP_NOT_FOUND".to_string(),
                vec![
                    "请检查分组ID是否正确".to_string(),
                    "使用 GET /api/groups 查看所有分组".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::GroupReadonly { name }) => (
                StatusCode::FORBIDDEN,
                format!("预置分组 {} 只读，不允许修改或删除", name),
                "GROUP_READONLY".to_string(),
                vec![
                    "预置分组随系统发布，不可修改".to_string(),
                    "如需定制，请创建自定义分组".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::InvalidTransition { task_id, from, to }) => (
                StatusCode::CONFLICT,
                format!("任务 {} 不允许从 {:?} 迁移到 {:?}", task_id, from, to),
                "INVALID_TRANSITION".to_string(),
                vec![
                    "任务状态可能已被并发更新".to_string(),
                    "请刷新任务状态后重试".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::DependencyUnsatisfied(msg)) => (
                StatusCode::CONFLICT,
                format!("依赖未就绪: {}", msg),
                "DEPENDENCY_UNSATISFIED".to_string(),
                vec![
                    "请先同步缺失的依赖数据".to_string(),
                    "使用 GET /api/plugins/{name}/dependencies 查看依赖状态".to_string(),
                ],
            ),
            ApiError::Sync(SyncError::CircularDependency) => (
                StatusCode::BAD_REQUEST,
                "插件依赖存在环".to_string(),
                "CIRCULAR_DEPENDENCY".to_string(),
                vec!["请检查插件目录的依赖声明".to_string()],
            ),
            ApiError::Sync(SyncError::InvalidParams(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数无效: {}", msg),
                "INVALID_PARAMS".to_string(),
                vec!["请检查请求参数格式是否正确".to_string()],
            ),
            ApiError::Sync(SyncError::Configuration(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("配置错误: {}", msg),
                "CONFIG_ERROR".to_string(),
                vec!["请检查配置项取值是否合法".to_string()],
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {}", msg),
                "BAD_REQUEST".to_string(),
                vec![
                    "请检查请求格式和参数".to_string(),
                    "确保Content-Type正确设置".to_string(),
                ],
            ),
            ApiError::Sync(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR".to_string(),
                vec![
                    "系统遇到内部错误，请稍后重试".to_string(),
                    format!("错误详情: {}", e),
                ],
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR".to_string(),
                vec![
                    "系统遇到内部错误，请稍后重试".to_string(),
                    format!("错误详情: {}", msg),
                ],
            ),
        };

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        }

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": suggestions,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
