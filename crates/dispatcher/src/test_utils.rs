//! 测试用内存实现
//!
//! 仓储、数仓和执行器的内存版，语义与SQLite实现对齐
//! （状态迁移CAS、进度单调、按日期分区幂等），供本crate和上层测试复用。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use datasync_domain::entities::{
    ColumnDef, DataExistsResult, ExecutionFilter, ExecutionRecord, ExecutionStatus, Plugin,
    PluginGroup, ScheduleConfig, SyncConfig, SyncTask, SyncTaskStatus, SyncTaskType, TaskFilter,
};
use datasync_domain::ports::{PluginExecutor, Warehouse};
use datasync_domain::repositories::{
    ConfigRepository, ExecutionRepository, GroupRepository, TaskRepository,
};
use datasync_domain::{SyncError, SyncResult};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<String, SyncTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        lock(&self.tasks).insert(task.id.clone(), task.clone());
        Ok(task.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<SyncTask>> {
        Ok(lock(&self.tasks).get(id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> SyncResult<(Vec<SyncTask>, i64)> {
        let tasks = lock(&self.tasks);
        let mut matched: Vec<SyncTask> = tasks
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .plugin_name
                    .as_ref()
                    .map_or(true, |p| t.plugin_name == *p)
            })
            .filter(|t| {
                filter
                    .execution_id
                    .as_ref()
                    .map_or(true, |e| t.execution_id.as_ref() == Some(e))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as i64;
        let page = filter.page.max(1) as usize;
        let page_size = filter.page_size.clamp(1, 200) as usize;
        let page_items = matched
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok((page_items, total))
    }

    async fn get_by_execution(&self, execution_id: &str) -> SyncResult<Vec<SyncTask>> {
        let tasks = lock(&self.tasks);
        let mut matched: Vec<SyncTask> = tasks
            .values()
            .filter(|t| t.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn get_by_status(&self, status: SyncTaskStatus) -> SyncResult<Vec<SyncTask>> {
        let tasks = lock(&self.tasks);
        let mut matched: Vec<SyncTask> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn transition(
        &self,
        id: &str,
        new_status: SyncTaskStatus,
        error_message: Option<&str>,
    ) -> SyncResult<SyncTask> {
        let mut tasks = lock(&self.tasks);
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SyncError::task_not_found(id))?;
        if !task.status.can_transition_to(new_status) {
            return Err(SyncError::InvalidTransition {
                task_id: id.to_string(),
                from: task.status,
                to: new_status,
            });
        }
        task.update_status(new_status);
        if let Some(message) = error_message {
            task.error_message = Some(message.to_string());
        }
        Ok(task.clone())
    }

    async fn update_progress(
        &self,
        id: &str,
        progress: i32,
        records_processed: i64,
        total_records: i64,
    ) -> SyncResult<()> {
        let mut tasks = lock(&self.tasks);
        if let Some(task) = tasks.get_mut(id) {
            if task.status == SyncTaskStatus::Running {
                task.progress = task.progress.max(progress.min(100));
                task.records_processed = records_processed;
                task.total_records = total_records;
            }
        }
        Ok(())
    }

    async fn set_dependencies_satisfied(&self, id: &str, satisfied: bool) -> SyncResult<()> {
        if let Some(task) = lock(&self.tasks).get_mut(id) {
            task.dependencies_satisfied = satisfied;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let mut tasks = lock(&self.tasks);
        match tasks.get(id) {
            Some(task) if task.status.is_terminal() => {
                tasks.remove(id);
                Ok(())
            }
            Some(_) => Err(SyncError::invalid_params("只能删除终态任务")),
            None => Err(SyncError::task_not_found(id)),
        }
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    records: Mutex<HashMap<String, ExecutionRecord>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, record: &ExecutionRecord) -> SyncResult<ExecutionRecord> {
        lock(&self.records).insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<ExecutionRecord>> {
        Ok(lock(&self.records).get(id).cloned())
    }

    async fn list_history(&self, filter: &ExecutionFilter) -> SyncResult<Vec<ExecutionRecord>> {
        let records = lock(&self.records);
        let since = filter
            .days
            .map(|days| Utc::now() - ChronoDuration::days(days.max(0)));
        let mut matched: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| since.map_or(true, |s| r.started_at >= s))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.trigger_type.map_or(true, |t| r.trigger_type == t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matched.truncate(filter.limit.unwrap_or(50).clamp(1, 500) as usize);
        Ok(matched)
    }

    async fn increment_completed(&self, id: &str) -> SyncResult<()> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| SyncError::execution_not_found(id))?;
        record.completed_plugins += 1;
        Ok(())
    }

    async fn increment_failed(&self, id: &str) -> SyncResult<()> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| SyncError::execution_not_found(id))?;
        record.failed_plugins += 1;
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed: bool,
    ) -> SyncResult<()> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| SyncError::execution_not_found(id))?;
        record.status = status;
        if completed {
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_can_retry(&self, id: &str, can_retry: bool) -> SyncResult<()> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| SyncError::execution_not_found(id))?;
        record.can_retry = can_retry;
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        lock(&self.records)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::execution_not_found(id))
    }
}

#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: Mutex<HashMap<String, PluginGroup>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn create(&self, group: &PluginGroup) -> SyncResult<PluginGroup> {
        let mut groups = lock(&self.groups);
        if groups.values().any(|g| g.name == group.name) {
            return Err(SyncError::invalid_params(format!(
                "分组名称已存在: {}",
                group.name
            )));
        }
        groups.insert(group.id.clone(), group.clone());
        Ok(group.clone())
    }

    async fn get_by_id(&self, id: &str) -> SyncResult<Option<PluginGroup>> {
        Ok(lock(&self.groups).get(id).cloned())
    }

    async fn list(&self, category: Option<&str>) -> SyncResult<Vec<PluginGroup>> {
        let groups = lock(&self.groups);
        let mut matched: Vec<PluginGroup> = groups
            .values()
            .filter(|g| category.map_or(true, |c| g.category == c))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn update(&self, group: &PluginGroup) -> SyncResult<PluginGroup> {
        let mut groups = lock(&self.groups);
        if !groups.contains_key(&group.id) {
            return Err(SyncError::group_not_found(&group.id));
        }
        let mut updated = group.clone();
        updated.updated_at = Utc::now();
        groups.insert(group.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        lock(&self.groups)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::group_not_found(id))
    }

    async fn seed_predefined(&self, groups: &[PluginGroup]) -> SyncResult<()> {
        let mut existing = lock(&self.groups);
        for group in groups {
            if !existing.values().any(|g| g.name == group.name) {
                existing.insert(group.id.clone(), group.clone());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConfigRepository {
    sync_config: Mutex<SyncConfig>,
    schedule_config: Mutex<ScheduleConfig>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_config(sync_config: SyncConfig) -> Self {
        Self {
            sync_config: Mutex::new(sync_config),
            schedule_config: Mutex::new(ScheduleConfig::default()),
        }
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn get_sync_config(&self) -> SyncResult<SyncConfig> {
        Ok(lock(&self.sync_config).clone())
    }

    async fn update_sync_config(&self, config: &SyncConfig) -> SyncResult<()> {
        config.validate().map_err(SyncError::invalid_params)?;
        *lock(&self.sync_config) = config.clone();
        Ok(())
    }

    async fn get_schedule_config(&self) -> SyncResult<ScheduleConfig> {
        Ok(lock(&self.schedule_config).clone())
    }

    async fn update_schedule_config(&self, config: &ScheduleConfig) -> SyncResult<()> {
        config.validate().map_err(SyncError::invalid_params)?;
        *lock(&self.schedule_config) = config.clone();
        Ok(())
    }
}

/// 内存数仓：(表名, 日期) 的存在性集合
#[derive(Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashSet<String>>,
    partitions: Mutex<HashSet<(String, NaiveDate)>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, dates: &[NaiveDate]) {
        lock(&self.tables).insert(table.to_string());
        let mut partitions = lock(&self.partitions);
        for &date in dates {
            partitions.insert((table.to_string(), date));
        }
    }

    pub fn insert_partition(&self, table: &str, date: NaiveDate) {
        lock(&self.partitions).insert((table.to_string(), date));
    }

    pub fn has_partition(&self, table: &str, date: NaiveDate) -> bool {
        lock(&self.partitions).contains(&(table.to_string(), date))
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn data_exists(&self, table: &str, dates: &[NaiveDate]) -> SyncResult<DataExistsResult> {
        let partitions = lock(&self.partitions);
        let mut result = DataExistsResult::default();
        for &date in dates {
            if partitions.contains(&(table.to_string(), date)) {
                result.existing.push(date);
            } else {
                result.missing.push(date);
            }
        }
        Ok(result)
    }

    async fn latest_date(&self, table: &str) -> SyncResult<Option<NaiveDate>> {
        let partitions = lock(&self.partitions);
        Ok(partitions
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, d)| *d)
            .max())
    }

    async fn describe_table(&self, table: &str) -> SyncResult<Vec<ColumnDef>> {
        if lock(&self.tables).contains(table) {
            Ok(vec![ColumnDef::new("trade_date", "TEXT")])
        } else {
            Err(SyncError::invalid_params(format!("数据表不存在: {table}")))
        }
    }

    async fn ensure_table(&self, plugin: &Plugin) -> SyncResult<()> {
        lock(&self.tables).insert(plugin.table_name.clone());
        Ok(())
    }
}

/// 测试日历：全开或全关
pub struct TestCalendar {
    trading: bool,
}

impl TestCalendar {
    pub fn all_trading() -> Self {
        Self { trading: true }
    }

    pub fn closed() -> Self {
        Self { trading: false }
    }
}

#[async_trait]
impl datasync_domain::ports::TradingCalendar for TestCalendar {
    async fn is_trading_day(&self, _date: NaiveDate) -> SyncResult<bool> {
        Ok(self.trading)
    }

    async fn trading_days_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<NaiveDate>> {
        if !self.trading {
            return Ok(Vec::new());
        }
        let mut days = Vec::new();
        let mut cur = start;
        while cur <= end {
            days.push(cur);
            cur = cur
                .succ_opt()
                .ok_or_else(|| SyncError::Internal("日期越界".to_string()))?;
        }
        Ok(days)
    }
}

/// 脚本化执行器
///
/// 可指定失败的(插件, 日期)组合，成功时把分区写入关联的内存数仓；
/// 同时记录并发水位，供并发上限断言使用。
pub struct ScriptedExecutor {
    warehouse: Arc<InMemoryWarehouse>,
    failures: Mutex<HashSet<(String, Option<NaiveDate>)>>,
    delay: Duration,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    calls: Mutex<Vec<(String, NaiveDate)>>,
}

impl ScriptedExecutor {
    pub fn new(warehouse: Arc<InMemoryWarehouse>) -> Self {
        Self {
            warehouse,
            failures: Mutex::new(HashSet::new()),
            delay: Duration::from_millis(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 指定插件在所有日期上失败
    pub fn fail_plugin(&self, plugin_name: &str) {
        lock(&self.failures).insert((plugin_name.to_string(), None));
    }

    /// 指定插件在单个日期上失败
    pub fn fail_date(&self, plugin_name: &str, date: NaiveDate) {
        lock(&self.failures).insert((plugin_name.to_string(), Some(date)));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, NaiveDate)> {
        lock(&self.calls).clone()
    }

    /// 执行过的插件名，按首次调用顺序去重
    pub fn called_plugins(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        lock(&self.calls)
            .iter()
            .filter(|(plugin, _)| seen.insert(plugin.clone()))
            .map(|(plugin, _)| plugin.clone())
            .collect()
    }

    fn should_fail(&self, plugin_name: &str, date: NaiveDate) -> bool {
        let failures = lock(&self.failures);
        failures.contains(&(plugin_name.to_string(), None))
            || failures.contains(&(plugin_name.to_string(), Some(date)))
    }
}

#[async_trait]
impl PluginExecutor for ScriptedExecutor {
    async fn sync_date(
        &self,
        plugin: &Plugin,
        _task_type: SyncTaskType,
        date: NaiveDate,
    ) -> SyncResult<u64> {
        lock(&self.calls).push((plugin.name.clone(), date));

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = if self.should_fail(&plugin.name, date) {
            Err(SyncError::plugin_execution(format!(
                "scripted failure for {} on {}",
                plugin.name, date
            )))
        } else {
            self.warehouse.insert_partition(&plugin.table_name, date);
            Ok(42)
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
