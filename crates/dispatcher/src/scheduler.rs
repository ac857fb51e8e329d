//! 同步调度器
//!
//! 所有触发入口（单插件/批量/分组/定时/重试）都收敛到同一条执行链路：
//! 展开依赖 -> 拓扑排序 -> 建执行记录和任务 -> 事件驱动的派发循环。
//! 派发循环按执行记录为单位驱动，任务终态通过Notify唤醒下一轮准入。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use datasync_domain::entities::{
    DataExistsResult, ExecutionRecord, ExecutionStatus, Plugin, SyncConfig, SyncTask,
    SyncTaskStatus, SyncTaskType, TriggerSyncRequest, TriggerType,
};
use datasync_domain::ports::{TradingCalendar, Warehouse};
use datasync_domain::repositories::{
    ConfigRepository, ExecutionRepository, GroupRepository, TaskRepository,
};
use datasync_domain::{SyncError, SyncResult};
use datasync_registry::PluginRegistry;

use crate::concurrency::{CancelRegistry, ConcurrencyController};
use crate::execution::ExecutionManager;
use crate::runner::TaskRunner;

/// 派发循环空转时的兜底唤醒间隔
const DISPATCH_FALLBACK_TICK: Duration = Duration::from_millis(500);

const STOP_MESSAGE: &str = "执行已停止，任务取消";
const RESTART_MESSAGE: &str = "进程重启，任务中断";

/// 一个待创建任务的完整描述
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub plugin_name: String,
    pub task_type: SyncTaskType,
    pub trade_dates: Vec<NaiveDate>,
    pub force_overwrite: bool,
}

pub struct SyncScheduler {
    registry: Arc<PluginRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    group_repo: Arc<dyn GroupRepository>,
    config_repo: Arc<dyn ConfigRepository>,
    warehouse: Arc<dyn Warehouse>,
    calendar: Arc<dyn TradingCalendar>,
    runner: Arc<TaskRunner>,
    concurrency: Arc<ConcurrencyController>,
    cancels: Arc<CancelRegistry>,
    executions: Arc<ExecutionManager>,
    notify: Arc<Notify>,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PluginRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        group_repo: Arc<dyn GroupRepository>,
        config_repo: Arc<dyn ConfigRepository>,
        warehouse: Arc<dyn Warehouse>,
        calendar: Arc<dyn TradingCalendar>,
        runner: Arc<TaskRunner>,
        concurrency: Arc<ConcurrencyController>,
    ) -> Self {
        let executions = Arc::new(ExecutionManager::new(
            task_repo.clone(),
            execution_repo.clone(),
        ));
        Self {
            registry,
            task_repo,
            execution_repo,
            group_repo,
            config_repo,
            warehouse,
            calendar,
            runner,
            concurrency,
            cancels: Arc::new(CancelRegistry::new()),
            executions,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn concurrency(&self) -> &ConcurrencyController {
        &self.concurrency
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // ---- 触发入口 ----

    /// 单插件触发
    ///
    /// 目标日期数据全部已存在且未要求覆盖时，落一个合成完成任务短路返回；
    /// 硬依赖数据缺失时直接拒绝，不建任务。
    pub async fn trigger_single(
        self: &Arc<Self>,
        request: &TriggerSyncRequest,
    ) -> SyncResult<ExecutionRecord> {
        let plugin = self.require_enabled(&request.plugin_name).await?;
        let dates = self.resolve_dates(&request.trade_dates).await?;

        for dep in self.registry.graph().hard_dependencies(&plugin.name) {
            let dep_plugin = self.registry.require(dep).await?;
            let check = self
                .warehouse
                .data_exists(&dep_plugin.table_name, &dates)
                .await?;
            if !check.all_exist() {
                return Err(SyncError::DependencyUnsatisfied(format!(
                    "插件 {} 的硬依赖 {} 在 {} 个日期上缺少数据",
                    plugin.name,
                    dep,
                    check.missing.len()
                )));
            }
        }

        let spec = TaskSpec {
            plugin_name: plugin.name.clone(),
            task_type: request.task_type,
            trade_dates: dates,
            force_overwrite: request.force_overwrite,
        };
        self.launch(TriggerType::Manual, vec![spec], None, None)
            .await
    }

    /// 批量触发，按需做传递闭包展开，任务按拓扑顺序创建
    ///
    /// include_optional为None时跟随调度配置的include_optional_deps。
    pub async fn trigger_batch(
        self: &Arc<Self>,
        plugin_names: &[String],
        task_type: SyncTaskType,
        trade_dates: &[NaiveDate],
        force_overwrite: bool,
        expand_dependencies: bool,
        include_optional: Option<bool>,
    ) -> SyncResult<ExecutionRecord> {
        if plugin_names.is_empty() {
            return Err(SyncError::invalid_params("插件列表不能为空"));
        }
        for name in plugin_names {
            self.require_enabled(name).await?;
        }

        let include_optional = match include_optional {
            Some(value) => value,
            None => {
                self.config_repo
                    .get_schedule_config()
                    .await?
                    .include_optional_deps
            }
        };
        let expanded = if expand_dependencies {
            self.registry
                .graph()
                .expand_with_dependencies(plugin_names, include_optional)?
        } else {
            plugin_names.to_vec()
        };

        let dates = self.resolve_dates(trade_dates).await?;
        let specs = expanded
            .into_iter()
            .map(|name| TaskSpec {
                plugin_name: name,
                task_type,
                trade_dates: dates.clone(),
                force_overwrite,
            })
            .collect();
        self.launch(TriggerType::Manual, specs, None, None).await
    }

    /// 分组触发：分组的插件集合 + 分组默认任务类型
    pub async fn trigger_group(
        self: &Arc<Self>,
        group_id: &str,
        trade_dates: &[NaiveDate],
        force_overwrite: bool,
    ) -> SyncResult<ExecutionRecord> {
        let group = self
            .group_repo
            .get_by_id(group_id)
            .await?
            .ok_or_else(|| SyncError::group_not_found(group_id))?;
        if group.plugin_names.is_empty() {
            return Err(SyncError::invalid_params(format!(
                "分组 {} 未包含任何插件",
                group.name
            )));
        }
        for name in &group.plugin_names {
            self.require_enabled(name).await?;
        }

        let include_optional = self
            .config_repo
            .get_schedule_config()
            .await?
            .include_optional_deps;
        let expanded = self
            .registry
            .graph()
            .expand_with_dependencies(&group.plugin_names, include_optional)?;
        let dates = self.resolve_dates(trade_dates).await?;

        let specs = expanded
            .into_iter()
            .map(|name| TaskSpec {
                plugin_name: name,
                task_type: group.default_task_type,
                trade_dates: dates.clone(),
                force_overwrite,
            })
            .collect();
        self.launch(TriggerType::Group, specs, Some(group.name.clone()), None)
            .await
    }

    /// 定时触发：非交易日按配置跳过，落skipped记录留痕
    pub async fn trigger_schedule(self: &Arc<Self>) -> SyncResult<ExecutionRecord> {
        let config = self.config_repo.get_schedule_config().await?;
        let today = Utc::now().date_naive();

        if config.skip_non_trading_days && !self.calendar.is_trading_day(today).await? {
            info!("今日 {} 非交易日，跳过定时调度", today);
            let record = ExecutionRecord::skipped(TriggerType::Scheduled, "非交易日");
            return self.execution_repo.create(&record).await;
        }

        let candidates = self.registry.schedule_candidates().await;
        if candidates.is_empty() {
            let record = ExecutionRecord::skipped(TriggerType::Scheduled, "无启用的调度插件");
            return self.execution_repo.create(&record).await;
        }

        let names: Vec<String> = candidates.iter().map(|p| p.name.clone()).collect();
        let expanded = self
            .registry
            .graph()
            .expand_with_dependencies(&names, config.include_optional_deps)?;
        let dates = self.resolve_dates(&[]).await?;

        let specs = expanded
            .into_iter()
            .map(|name| TaskSpec {
                plugin_name: name,
                task_type: SyncTaskType::Incremental,
                trade_dates: dates.clone(),
                force_overwrite: false,
            })
            .collect();
        self.launch(TriggerType::Scheduled, specs, None, None).await
    }

    /// 部分重试：默认只重试失败的插件子集，原记录不动
    pub async fn partial_retry(
        self: &Arc<Self>,
        execution_id: &str,
        plugin_names: Option<&[String]>,
    ) -> SyncResult<ExecutionRecord> {
        let record = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| SyncError::execution_not_found(execution_id))?;
        if !record.is_finished() {
            return Err(SyncError::invalid_params("执行尚未结束，不能重试"));
        }

        let tasks = self.task_repo.get_by_execution(execution_id).await?;
        let subset: Vec<String> = match plugin_names {
            Some(names) => {
                for name in names {
                    if !tasks.iter().any(|t| t.plugin_name == *name) {
                        return Err(SyncError::invalid_params(format!(
                            "插件 {name} 不在原执行范围内"
                        )));
                    }
                }
                names.to_vec()
            }
            None => tasks
                .iter()
                .filter(|t| t.status == SyncTaskStatus::Failed)
                .map(|t| t.plugin_name.clone())
                .collect(),
        };
        if subset.is_empty() {
            return Err(SyncError::invalid_params("没有可重试的失败任务"));
        }

        let by_plugin: HashMap<&str, &SyncTask> = tasks
            .iter()
            .map(|t| (t.plugin_name.as_str(), t))
            .collect();
        let specs = subset
            .iter()
            .map(|name| {
                let original = by_plugin
                    .get(name.as_str())
                    .ok_or_else(|| SyncError::plugin_not_found(name.clone()))?;
                Ok(TaskSpec {
                    plugin_name: name.clone(),
                    task_type: original.task_type,
                    trade_dates: original.trade_dates.clone(),
                    force_overwrite: original.force_overwrite,
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;

        self.launch(
            TriggerType::Retry,
            specs,
            record.group_name.clone(),
            Some(execution_id.to_string()),
        )
        .await
    }

    /// 单任务重试：以原任务参数另起一条retry执行链路
    pub async fn retry_task(self: &Arc<Self>, task_id: &str) -> SyncResult<ExecutionRecord> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| SyncError::task_not_found(task_id))?;
        if !matches!(
            task.status,
            SyncTaskStatus::Failed | SyncTaskStatus::Cancelled
        ) {
            return Err(SyncError::invalid_params(format!(
                "任务状态为 {}，只有失败或已取消的任务可以重试",
                task.status.as_str()
            )));
        }

        let spec = TaskSpec {
            plugin_name: task.plugin_name.clone(),
            task_type: task.task_type,
            trade_dates: task.trade_dates.clone(),
            force_overwrite: task.force_overwrite,
        };
        self.launch(TriggerType::Retry, vec![spec], None, task.execution_id)
            .await
    }

    // ---- 停止与取消 ----

    /// 停止一次执行：pending全部取消，在途任务跑到自然结束，记录转interrupted
    pub async fn stop(&self, execution_id: &str) -> SyncResult<()> {
        let record = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| SyncError::execution_not_found(execution_id))?;
        if record.is_finished() {
            return Err(SyncError::invalid_params("执行已结束"));
        }

        if !self.cancels.cancel(&stop_key(execution_id)) {
            // 驱动循环尚未注册（极早期），注册后立即置位
            self.cancels
                .register(&stop_key(execution_id))
                .store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
        info!("执行 {} 已请求停止", execution_id);
        Ok(())
    }

    /// 取消单个任务：pending立即取消；running置协作标志，分区边界生效
    pub async fn cancel_task(&self, task_id: &str) -> SyncResult<SyncTask> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| SyncError::task_not_found(task_id))?;

        match task.status {
            SyncTaskStatus::Pending => {
                let cancelled = self
                    .task_repo
                    .transition(task_id, SyncTaskStatus::Cancelled, Some("手动取消"))
                    .await?;
                self.notify.notify_waiters();
                Ok(cancelled)
            }
            SyncTaskStatus::Running => {
                self.cancels
                    .register(&task_key(task_id))
                    .store(true, Ordering::SeqCst);
                info!("任务 {} 已置取消标志，等待分区边界生效", task_id);
                Ok(task)
            }
            _ => Err(SyncError::invalid_params(format!(
                "任务已处于终态: {}",
                task.status.as_str()
            ))),
        }
    }

    pub async fn delete_task(&self, task_id: &str) -> SyncResult<()> {
        self.task_repo.delete(task_id).await
    }

    // ---- 崩溃恢复 ----

    /// 进程重启后清理遗留的非终态任务和执行记录
    ///
    /// 跨重启不保证恰好一次：running一律判失败，重试自然补数。
    pub async fn recover_interrupted(&self) -> SyncResult<()> {
        let running = self.task_repo.get_by_status(SyncTaskStatus::Running).await?;
        for task in &running {
            self.task_repo
                .transition(&task.id, SyncTaskStatus::Failed, Some(RESTART_MESSAGE))
                .await?;
            if let Some(execution_id) = &task.execution_id {
                self.executions
                    .record_terminal(execution_id, SyncTaskStatus::Failed)
                    .await?;
            }
        }

        let pending = self.task_repo.get_by_status(SyncTaskStatus::Pending).await?;
        for task in &pending {
            self.task_repo
                .transition(&task.id, SyncTaskStatus::Cancelled, Some(RESTART_MESSAGE))
                .await?;
        }

        let stale = self
            .execution_repo
            .list_history(&datasync_domain::entities::ExecutionFilter {
                status: Some(ExecutionStatus::Running),
                limit: Some(500),
                ..Default::default()
            })
            .await?;
        for record in &stale {
            self.executions.try_finalize(&record.id, true).await?;
        }

        if !running.is_empty() || !pending.is_empty() || !stale.is_empty() {
            info!(
                "崩溃恢复完成: {}个running任务判失败, {}个pending任务取消, {}条执行记录收尾",
                running.len(),
                pending.len(),
                stale.len()
            );
        }
        Ok(())
    }

    // ---- 配置 ----

    pub async fn update_sync_config(&self, config: &SyncConfig) -> SyncResult<()> {
        self.config_repo.update_sync_config(config).await?;
        self.concurrency.resize(config.max_concurrent_tasks)?;
        Ok(())
    }

    pub async fn check_data_exists(
        &self,
        plugin_name: &str,
        trade_dates: &[NaiveDate],
    ) -> SyncResult<DataExistsResult> {
        let plugin = self.registry.require(plugin_name).await?;
        let dates = self.resolve_dates(trade_dates).await?;
        self.warehouse.data_exists(&plugin.table_name, &dates).await
    }

    // ---- 内部实现 ----

    async fn require_enabled(&self, name: &str) -> SyncResult<Plugin> {
        let plugin = self.registry.require(name).await?;
        if !plugin.enabled {
            return Err(SyncError::invalid_params(format!("插件已禁用: {name}")));
        }
        Ok(plugin)
    }

    /// 空日期列表回退到最近一个交易日
    async fn resolve_dates(&self, dates: &[NaiveDate]) -> SyncResult<Vec<NaiveDate>> {
        if !dates.is_empty() {
            let mut dates = dates.to_vec();
            dates.sort();
            dates.dedup();
            return Ok(dates);
        }

        let mut day = Utc::now().date_naive();
        for _ in 0..14 {
            if self.calendar.is_trading_day(day).await? {
                return Ok(vec![day]);
            }
            day = day
                .pred_opt()
                .ok_or_else(|| SyncError::Internal("日期越界".to_string()))?;
        }
        Err(SyncError::invalid_params("近两周内没有交易日"))
    }

    /// 统一执行链路：建记录和任务，全量已存在的插件落合成完成任务，
    /// 有真实工作时再拉起驱动循环。
    async fn launch(
        self: &Arc<Self>,
        trigger_type: TriggerType,
        specs: Vec<TaskSpec>,
        group_name: Option<String>,
        parent_execution_id: Option<String>,
    ) -> SyncResult<ExecutionRecord> {
        let names: Vec<String> = specs.iter().map(|s| s.plugin_name.clone()).collect();
        let order = self.registry.graph().topological_order(&names, true)?;
        let by_name: HashMap<&str, &TaskSpec> = specs
            .iter()
            .map(|s| (s.plugin_name.as_str(), s))
            .collect();

        let mut record = ExecutionRecord::new(trigger_type);
        record.total_plugins = order.len() as i64;
        record.execution_order = order.clone();
        record.group_name = group_name;
        record.parent_execution_id = parent_execution_id;

        let mut tasks: Vec<SyncTask> = Vec::with_capacity(order.len());
        let mut synthetic = 0i64;
        for name in &order {
            let spec = by_name
                .get(name.as_str())
                .ok_or_else(|| SyncError::plugin_not_found(name.clone()))?;
            let plugin = self.registry.require(name).await?;

            let mut task = if !spec.force_overwrite
                && self
                    .warehouse
                    .data_exists(&plugin.table_name, &spec.trade_dates)
                    .await?
                    .all_exist()
            {
                synthetic += 1;
                SyncTask::synthetic_completed(name, spec.task_type, spec.trade_dates.clone())
            } else {
                let mut task = SyncTask::new(name, spec.task_type, spec.trade_dates.clone());
                task.force_overwrite = spec.force_overwrite;
                task
            };
            task.execution_id = Some(record.id.clone());
            tasks.push(task);
        }

        record.task_ids = tasks.iter().map(|t| t.id.clone()).collect();
        record.completed_plugins = synthetic;
        let record = self.execution_repo.create(&record).await?;
        for task in &tasks {
            self.task_repo.create(task).await?;
        }

        info!(
            "执行 {} 已创建: 触发={}, {}个插件, 其中{}个数据已存在",
            record.id,
            trigger_type.as_str(),
            record.total_plugins,
            synthetic
        );

        if synthetic == record.total_plugins {
            self.executions.try_finalize(&record.id, false).await?;
            return self
                .execution_repo
                .get_by_id(&record.id)
                .await?
                .ok_or_else(|| SyncError::execution_not_found(&record.id));
        }

        let scheduler = self.clone();
        let execution_id = record.id.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.drive_execution(&execution_id).await {
                error!("执行 {} 驱动循环异常退出: {}", execution_id, e);
            }
        });

        Ok(record)
    }

    /// 单次执行的派发循环
    ///
    /// 每轮：处理停止请求 -> 级联取消被失败依赖阻塞的任务 ->
    /// 准入就绪任务（许可+硬依赖满足）-> 全部终态则收尾。
    async fn drive_execution(self: &Arc<Self>, execution_id: &str) -> SyncResult<()> {
        let stop_flag = self.cancels.register(&stop_key(execution_id));
        let mut dispatched: HashSet<String> = HashSet::new();

        loop {
            let stop_requested = stop_flag.load(Ordering::SeqCst);
            let tasks = self.task_repo.get_by_execution(execution_id).await?;

            let status_by_plugin: HashMap<&str, SyncTaskStatus> = tasks
                .iter()
                .map(|t| (t.plugin_name.as_str(), t.status))
                .collect();

            for task in &tasks {
                if task.status != SyncTaskStatus::Pending || dispatched.contains(&task.id) {
                    continue;
                }

                if stop_requested {
                    self.task_repo
                        .transition(&task.id, SyncTaskStatus::Cancelled, Some(STOP_MESSAGE))
                        .await?;
                    continue;
                }

                match self.admission_check(task, &status_by_plugin).await? {
                    Admission::Ready {
                        optional_satisfied,
                    } => {
                        if !optional_satisfied {
                            self.task_repo
                                .set_dependencies_satisfied(&task.id, false)
                                .await?;
                        }
                        dispatched.insert(task.id.clone());
                        self.spawn_runner(task.clone()).await?;
                    }
                    Admission::Wait => {}
                    Admission::Blocked(reason) => {
                        warn!("任务 {} 被阻塞取消: {}", task.id, reason);
                        self.task_repo
                            .transition(&task.id, SyncTaskStatus::Cancelled, Some(&reason))
                            .await?;
                    }
                }
            }

            if let Some(status) = self
                .executions
                .try_finalize(execution_id, stop_requested)
                .await?
            {
                debug!("执行 {} 结束: {}", execution_id, status.as_str());
                self.cancels.remove(&stop_key(execution_id));
                return Ok(());
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(DISPATCH_FALLBACK_TICK) => {}
            }
        }
    }

    /// 准入判定：硬依赖逐个检查，可选依赖只影响dependencies_satisfied标记
    async fn admission_check(
        &self,
        task: &SyncTask,
        status_by_plugin: &HashMap<&str, SyncTaskStatus>,
    ) -> SyncResult<Admission> {
        let graph = self.registry.graph();

        for dep in graph.hard_dependencies(&task.plugin_name) {
            match status_by_plugin.get(dep.as_str()) {
                Some(SyncTaskStatus::Completed) => {}
                Some(SyncTaskStatus::Failed) | Some(SyncTaskStatus::Cancelled) => {
                    return Ok(Admission::Blocked(format!(
                        "blocked by failed dependency: {dep}"
                    )));
                }
                Some(_) => return Ok(Admission::Wait),
                None => {
                    // 依赖不在本次执行内，以数仓存在性为准
                    let dep_plugin = self.registry.require(dep).await?;
                    let check = self
                        .warehouse
                        .data_exists(&dep_plugin.table_name, &task.trade_dates)
                        .await?;
                    if !check.all_exist() {
                        return Ok(Admission::Blocked(format!(
                            "blocked by failed dependency: {dep}"
                        )));
                    }
                }
            }
        }

        let mut optional_satisfied = true;
        for dep in graph.optional_dependencies(&task.plugin_name) {
            match status_by_plugin.get(dep.as_str()) {
                Some(SyncTaskStatus::Completed) => {}
                Some(SyncTaskStatus::Failed) | Some(SyncTaskStatus::Cancelled) => {
                    optional_satisfied = false;
                }
                Some(_) => return Ok(Admission::Wait),
                None => {
                    let dep_plugin = self.registry.require(dep).await?;
                    let check = self
                        .warehouse
                        .data_exists(&dep_plugin.table_name, &task.trade_dates)
                        .await?;
                    if !check.all_exist() {
                        optional_satisfied = false;
                    }
                }
            }
        }

        Ok(Admission::Ready { optional_satisfied })
    }

    /// 把任务丢进运行器：先排队等许可再执行，终态回调汇总并唤醒派发循环
    async fn spawn_runner(self: &Arc<Self>, task: SyncTask) -> SyncResult<()> {
        let plugin = self.registry.require(&task.plugin_name).await?;
        let max_date_threads = self.config_repo.get_sync_config().await?.max_date_threads;
        let cancel = self.cancels.register(&task_key(&task.id));

        let scheduler = self.clone();
        tokio::spawn(async move {
            // 预算耗尽时在这里排队，不占用派发循环
            let _permit = match scheduler.concurrency.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("任务 {} 获取许可失败: {}", task.id, e);
                    return;
                }
            };

            // 排队期间执行可能已被叫停或任务被点名取消
            let stopped = task
                .execution_id
                .as_deref()
                .map(|id| scheduler.cancels.is_cancelled(&stop_key(id)))
                .unwrap_or(false);
            if stopped || scheduler.cancels.is_cancelled(&task_key(&task.id)) {
                let _ = scheduler
                    .task_repo
                    .transition(&task.id, SyncTaskStatus::Cancelled, Some(STOP_MESSAGE))
                    .await;
                scheduler.cancels.remove(&task_key(&task.id));
                scheduler.notify.notify_waiters();
                return;
            }
            let task_id = task.id.clone();
            let execution_id = task.execution_id.clone();

            let outcome = scheduler
                .runner
                .run(&task, &plugin, max_date_threads, cancel)
                .await;

            match outcome {
                Ok(final_task) => {
                    if let Some(execution_id) = &execution_id {
                        if let Err(e) = scheduler
                            .executions
                            .record_terminal(execution_id, final_task.status)
                            .await
                        {
                            error!("执行 {} 汇总失败: {}", execution_id, e);
                        }
                    }
                }
                Err(e) => {
                    error!("任务 {} 运行器异常: {}", task_id, e);
                    // 尽力把任务推到失败终态，避免执行记录悬挂
                    if let Ok(failed) = scheduler
                        .task_repo
                        .transition(&task_id, SyncTaskStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        if let Some(execution_id) = &execution_id {
                            let _ = scheduler
                                .executions
                                .record_terminal(execution_id, failed.status)
                                .await;
                        }
                    }
                }
            }

            scheduler.cancels.remove(&task_key(&task_id));
            scheduler.notify.notify_waiters();
        });
        Ok(())
    }
}

enum Admission {
    Ready { optional_satisfied: bool },
    Wait,
    Blocked(String),
}

fn stop_key(execution_id: &str) -> String {
    format!("execution:{execution_id}")
}

fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}
