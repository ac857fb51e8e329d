//! 仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。
//! 任务与执行记录是系统里仅有的可变共享状态，所有变更都必须
//! 经由这里的 transition/increment 风格方法（单行原子语义）。

use async_trait::async_trait;

use crate::entities::{
    ExecutionFilter, ExecutionRecord, ExecutionStatus, PluginGroup, ScheduleConfig, SyncConfig,
    SyncTask, SyncTaskStatus, TaskFilter,
};
use crate::errors::SyncResult;

/// 同步任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask>;
    async fn get_by_id(&self, id: &str) -> SyncResult<Option<SyncTask>>;
    /// 返回 (任务列表, 满足条件的总数)
    async fn list(&self, filter: &TaskFilter) -> SyncResult<(Vec<SyncTask>, i64)>;
    async fn get_by_execution(&self, execution_id: &str) -> SyncResult<Vec<SyncTask>>;
    /// 按创建时间升序返回指定状态的任务
    async fn get_by_status(&self, status: SyncTaskStatus) -> SyncResult<Vec<SyncTask>>;
    /// 单行CAS状态迁移，非法迁移返回 InvalidTransition
    async fn transition(
        &self,
        id: &str,
        new_status: SyncTaskStatus,
        error_message: Option<&str>,
    ) -> SyncResult<SyncTask>;
    /// 进度单调不减，只在running状态下生效
    async fn update_progress(
        &self,
        id: &str,
        progress: i32,
        records_processed: i64,
        total_records: i64,
    ) -> SyncResult<()>;
    async fn set_dependencies_satisfied(&self, id: &str, satisfied: bool) -> SyncResult<()>;
    /// 只允许删除终态任务
    async fn delete(&self, id: &str) -> SyncResult<()>;
}

/// 执行记录仓储
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, record: &ExecutionRecord) -> SyncResult<ExecutionRecord>;
    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ExecutionRecord>>;
    async fn list_history(&self, filter: &ExecutionFilter) -> SyncResult<Vec<ExecutionRecord>>;
    /// 原子自增completed_plugins
    async fn increment_completed(&self, id: &str) -> SyncResult<()>;
    /// 原子自增failed_plugins
    async fn increment_failed(&self, id: &str) -> SyncResult<()>;
    async fn set_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed: bool,
    ) -> SyncResult<()>;
    async fn set_can_retry(&self, id: &str, can_retry: bool) -> SyncResult<()>;
    /// 操作员显式清理，正常流程不删除历史
    async fn delete(&self, id: &str) -> SyncResult<()>;
}

/// 插件分组仓储
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn create(&self, group: &PluginGroup) -> SyncResult<PluginGroup>;
    async fn get_by_id(&self, id: &str) -> SyncResult<Option<PluginGroup>>;
    async fn list(&self, category: Option<&str>) -> SyncResult<Vec<PluginGroup>>;
    async fn update(&self, group: &PluginGroup) -> SyncResult<PluginGroup>;
    async fn delete(&self, id: &str) -> SyncResult<()>;
    /// 预置分组按名称幂等落库
    async fn seed_predefined(&self, groups: &[PluginGroup]) -> SyncResult<()>;
}

/// 运行配置仓储（并发预算 + 定时调度配置）
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_sync_config(&self) -> SyncResult<SyncConfig>;
    async fn update_sync_config(&self, config: &SyncConfig) -> SyncResult<()>;
    async fn get_schedule_config(&self) -> SyncResult<ScheduleConfig>;
    async fn update_schedule_config(&self, config: &ScheduleConfig) -> SyncResult<()>;
}
