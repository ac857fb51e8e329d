use thiserror::Error;

use crate::entities::SyncTaskStatus;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("非法状态迁移: 任务 {task_id} 不允许 {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: SyncTaskStatus,
        to: SyncTaskStatus,
    },
    #[error("插件依赖存在环")]
    CircularDependency,
    #[error("插件不存在: {name}")]
    PluginNotFound { name: String },
    #[error("同步任务不存在: id={id}")]
    TaskNotFound { id: String },
    #[error("执行记录不存在: id={id}")]
    ExecutionNotFound { id: String },
    #[error("插件分组不存在: id={id}")]
    GroupNotFound { id: String },
    #[error("预置分组只读，不允许修改: {name}")]
    GroupReadonly { name: String },
    #[error("依赖未就绪: {0}")]
    DependencyUnsatisfied(String),
    #[error("插件执行失败: {0}")]
    PluginExecution(String),
    #[error("请求参数无效: {0}")]
    InvalidParams(String),
    #[error("数据库操作失败: {0}")]
    DatabaseOperation(String),
    #[error("数据序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn plugin_not_found<S: Into<String>>(name: S) -> Self {
        Self::PluginNotFound { name: name.into() }
    }

    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn execution_not_found<S: Into<String>>(id: S) -> Self {
        Self::ExecutionNotFound { id: id.into() }
    }

    pub fn group_not_found<S: Into<String>>(id: S) -> Self {
        Self::GroupNotFound { id: id.into() }
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn plugin_execution<S: Into<String>>(msg: S) -> Self {
        Self::PluginExecution(msg.into())
    }

    /// 致命错误：程序缺陷或配置损坏，不应吞掉也不应自动重试
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidTransition { .. }
                | SyncError::CircularDependency
                | SyncError::Configuration(_)
                | SyncError::Internal(_)
        )
    }

    /// 软性错误：等待下一轮调度即可，对调用方不算失败
    pub fn is_soft(&self) -> bool {
        matches!(self, SyncError::DependencyUnsatisfied(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::DatabaseOperation(_) | SyncError::PluginExecution(_)
        )
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::DatabaseOperation(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let e = SyncError::InvalidTransition {
            task_id: "t1".to_string(),
            from: SyncTaskStatus::Completed,
            to: SyncTaskStatus::Running,
        };
        assert!(e.is_fatal());
        assert!(!e.is_soft());

        assert!(SyncError::CircularDependency.is_fatal());
        assert!(SyncError::DependencyUnsatisfied("daily_basic".to_string()).is_soft());
        assert!(SyncError::plugin_execution("fetch failed").is_retryable());
        assert!(!SyncError::task_not_found("x").is_fatal());
    }
}
