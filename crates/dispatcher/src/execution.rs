//! 执行记录汇总
//!
//! 任务每进入一次终态，这里负责把计数器滚动到所属执行记录上，
//! 并在全部任务终态后推导记录的最终状态。

use std::sync::Arc;

use tracing::{info, warn};

use datasync_domain::entities::{ExecutionStatus, SyncTask, SyncTaskStatus};
use datasync_domain::repositories::{ExecutionRepository, TaskRepository};
use datasync_domain::{SyncError, SyncResult};

pub struct ExecutionManager {
    task_repo: Arc<dyn TaskRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
}

impl ExecutionManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
    ) -> Self {
        Self {
            task_repo,
            execution_repo,
        }
    }

    /// 任务终态回调：completed/failed计入对应计数器，cancelled不计数
    pub async fn record_terminal(&self, execution_id: &str, status: SyncTaskStatus) -> SyncResult<()> {
        match status {
            SyncTaskStatus::Completed => self.execution_repo.increment_completed(execution_id).await,
            SyncTaskStatus::Failed => self.execution_repo.increment_failed(execution_id).await,
            SyncTaskStatus::Cancelled => Ok(()),
            other => {
                warn!("非终态任务不应触发汇总: {}", other.as_str());
                Ok(())
            }
        }
    }

    /// 全部任务终态时收尾记录，返回推导出的最终状态；仍有在途任务时返回None
    pub async fn try_finalize(
        &self,
        execution_id: &str,
        stop_requested: bool,
    ) -> SyncResult<Option<ExecutionStatus>> {
        let tasks = self.task_repo.get_by_execution(execution_id).await?;
        if tasks.iter().any(|t| !t.status.is_terminal()) {
            return Ok(None);
        }

        let status = Self::derive_status(&tasks, stop_requested);
        let failed = tasks
            .iter()
            .filter(|t| t.status == SyncTaskStatus::Failed)
            .count();

        self.execution_repo
            .set_can_retry(execution_id, failed > 0)
            .await?;
        self.execution_repo
            .set_status(execution_id, status, true)
            .await?;

        let record = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| SyncError::execution_not_found(execution_id))?;
        debug_assert!(record.counters_consistent());

        info!(
            "执行记录 {} 收尾: 状态={}, 完成{}/{}, 失败{}",
            execution_id,
            status.as_str(),
            record.completed_plugins,
            record.total_plugins,
            record.failed_plugins
        );
        Ok(Some(status))
    }

    /// 终态推导：有失败即failed，被叫停或有取消即interrupted，否则completed
    fn derive_status(tasks: &[SyncTask], stop_requested: bool) -> ExecutionStatus {
        let any_failed = tasks.iter().any(|t| t.status == SyncTaskStatus::Failed);
        let any_cancelled = tasks.iter().any(|t| t.status == SyncTaskStatus::Cancelled);

        if any_failed {
            ExecutionStatus::Failed
        } else if stop_requested || any_cancelled {
            ExecutionStatus::Interrupted
        } else {
            ExecutionStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasync_domain::entities::SyncTaskType;

    fn task_with_status(status: SyncTaskStatus) -> SyncTask {
        let mut task = SyncTask::new("daily_quote", SyncTaskType::Incremental, vec![]);
        task.status = status;
        task
    }

    #[test]
    fn test_derive_status() {
        use SyncTaskStatus::*;

        let all_done = vec![task_with_status(Completed), task_with_status(Completed)];
        assert_eq!(
            ExecutionManager::derive_status(&all_done, false),
            ExecutionStatus::Completed
        );

        let with_failed = vec![task_with_status(Completed), task_with_status(Failed)];
        assert_eq!(
            ExecutionManager::derive_status(&with_failed, false),
            ExecutionStatus::Failed
        );

        // 失败优先于叫停
        assert_eq!(
            ExecutionManager::derive_status(&with_failed, true),
            ExecutionStatus::Failed
        );

        let with_cancelled = vec![task_with_status(Completed), task_with_status(Cancelled)];
        assert_eq!(
            ExecutionManager::derive_status(&with_cancelled, false),
            ExecutionStatus::Interrupted
        );

        assert_eq!(
            ExecutionManager::derive_status(&all_done, true),
            ExecutionStatus::Interrupted
        );
    }
}
