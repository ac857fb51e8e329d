//! 单任务运行器
//!
//! 持有许可后按日期分区并行执行，日期之间无依赖。
//! 每个日期分区幂等：已有数据且未要求覆盖时直接跳过。
//! 取消标志只在分区边界检查，在途分区跑完为止，部分成功的分区保留。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use datasync_domain::entities::{Plugin, SyncTask, SyncTaskStatus};
use datasync_domain::ports::{PluginExecutor, Warehouse};
use datasync_domain::repositories::TaskRepository;
use datasync_domain::SyncResult;

pub struct TaskRunner {
    task_repo: Arc<dyn TaskRepository>,
    warehouse: Arc<dyn Warehouse>,
    executor: Arc<dyn PluginExecutor>,
}

enum DateOutcome {
    Synced(NaiveDate, u64),
    Failed(NaiveDate, String),
    Cancelled,
}

impl TaskRunner {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        warehouse: Arc<dyn Warehouse>,
        executor: Arc<dyn PluginExecutor>,
    ) -> Self {
        Self {
            task_repo,
            warehouse,
            executor,
        }
    }

    /// 驱动一个任务从running到终态，返回终态任务
    pub async fn run(
        &self,
        task: &SyncTask,
        plugin: &Plugin,
        max_date_threads: usize,
        cancel: Arc<AtomicBool>,
    ) -> SyncResult<SyncTask> {
        // CAS失败说明任务已被并发取消，不再执行
        let running = match self
            .task_repo
            .transition(&task.id, SyncTaskStatus::Running, None)
            .await
        {
            Ok(task) => task,
            Err(datasync_domain::SyncError::InvalidTransition { .. }) => {
                debug!("任务 {} 已不在可运行状态，跳过执行", task.id);
                return self.current_task(&task.id).await;
            }
            Err(e) => return Err(e),
        };

        self.warehouse.ensure_table(plugin).await?;

        let total_dates = running.trade_dates.len();
        let (to_sync, pre_existing) = if running.force_overwrite {
            (running.trade_dates.clone(), Vec::new())
        } else {
            let check = self
                .warehouse
                .data_exists(&plugin.table_name, &running.trade_dates)
                .await?;
            (check.missing, check.existing)
        };

        info!(
            "任务 {} 开始执行: 插件={}, 共{}个日期, 其中{}个已存在",
            running.id,
            plugin.name,
            total_dates,
            pre_existing.len()
        );

        let mut done = pre_existing.len();
        let mut records_processed: i64 = 0;
        let mut failures: Vec<(NaiveDate, String)> = Vec::new();
        let mut saw_cancel = false;

        let mut stream = futures::stream::iter(to_sync.into_iter().map(|date| {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            let plugin = plugin.clone();
            let task_type = running.task_type;
            async move {
                if cancel.load(Ordering::SeqCst) {
                    return DateOutcome::Cancelled;
                }
                match executor.sync_date(&plugin, task_type, date).await {
                    Ok(rows) => DateOutcome::Synced(date, rows),
                    Err(e) => DateOutcome::Failed(date, e.to_string()),
                }
            }
        }))
        .buffer_unordered(max_date_threads.max(1));

        while let Some(outcome) = stream.next().await {
            match outcome {
                DateOutcome::Synced(date, rows) => {
                    done += 1;
                    records_processed += rows as i64;
                    debug!("任务 {} 完成日期 {}: {} 行", running.id, date, rows);
                }
                DateOutcome::Failed(date, message) => {
                    done += 1;
                    warn!("任务 {} 日期 {} 失败: {}", running.id, date, message);
                    failures.push((date, message));
                }
                DateOutcome::Cancelled => {
                    saw_cancel = true;
                }
            }

            let progress = if total_dates == 0 {
                100
            } else {
                (done * 100 / total_dates) as i32
            };
            self.task_repo
                .update_progress(&running.id, progress, records_processed, total_dates as i64)
                .await?;
        }
        drop(stream);

        let final_task = if saw_cancel {
            self.task_repo
                .transition(&running.id, SyncTaskStatus::Cancelled, Some("任务已取消"))
                .await?
        } else if failures.is_empty() {
            self.task_repo
                .transition(&running.id, SyncTaskStatus::Completed, None)
                .await?
        } else {
            failures.sort_by_key(|(date, _)| *date);
            let message = failures
                .iter()
                .map(|(date, msg)| format!("{date}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ");
            self.task_repo
                .transition(&running.id, SyncTaskStatus::Failed, Some(&message))
                .await?
        };

        info!(
            "任务 {} 执行结束: 状态={}, 处理{}行",
            final_task.id,
            final_task.status.as_str(),
            final_task.records_processed
        );
        Ok(final_task)
    }

    async fn current_task(&self, id: &str) -> SyncResult<SyncTask> {
        self.task_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| datasync_domain::SyncError::task_not_found(id))
    }
}
