use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 插件角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    Primary,
    Basic,
    Derived,
    Auxiliary,
}

/// 调度频率
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    /// 每个自然日
    Daily,
    /// 仅交易日
    Weekday,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginSchedule {
    pub frequency: ScheduleFrequency,
    /// "HH:MM" 格式的本地执行时间
    pub time: String,
}

impl PluginSchedule {
    pub fn new(frequency: ScheduleFrequency, time: &str) -> Self {
        Self {
            frequency,
            time: time.to_string(),
        }
    }

    /// 解析 "HH:MM" 为 (时, 分)
    pub fn parse_time(&self) -> Option<(u32, u32)> {
        let (h, m) = self.time.split_once(':')?;
        let hour: u32 = h.parse().ok()?;
        let minute: u32 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some((hour, minute))
    }
}

/// 目标表的列定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// 数据源插件的静态描述
///
/// 插件在部署时由注册表声明，运行期只允许启停和调度配置两类变更，
/// 依赖关系（硬依赖无环）在加载时校验。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    /// 开放分类：stock / index / etf_fund / system 等，不做穷举匹配
    pub category: String,
    pub role: PluginRole,
    pub description: String,
    /// 硬依赖：数据不存在时阻塞调度
    pub dependencies: Vec<String>,
    /// 可选依赖：缺失只降级，不阻塞
    pub optional_dependencies: Vec<String>,
    pub schedule: PluginSchedule,
    pub schedule_enabled: bool,
    pub enabled: bool,
    pub table_name: String,
    pub table_schema: Vec<ColumnDef>,
}

impl Plugin {
    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "插件 '{}' (分类: {}, 角色: {:?})",
            self.name, self.category, self.role
        )
    }
}

/// 同步任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncTaskType {
    Full,
    Incremental,
    Backfill,
}

impl SyncTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTaskType::Full => "full",
            SyncTaskType::Incremental => "incremental",
            SyncTaskType::Backfill => "backfill",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for SyncTaskType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SyncTaskType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "full" => Ok(SyncTaskType::Full),
            "incremental" => Ok(SyncTaskType::Incremental),
            "backfill" => Ok(SyncTaskType::Backfill),
            _ => Err(format!("Invalid sync task type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SyncTaskType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 同步任务状态
///
/// 状态迁移单调，合法迁移集合固定为
/// pending→running, running→completed, running→failed,
/// pending→cancelled, running→cancelled，其余一律拒绝。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTaskStatus::Pending => "pending",
            SyncTaskStatus::Running => "running",
            SyncTaskStatus::Completed => "completed",
            SyncTaskStatus::Failed => "failed",
            SyncTaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncTaskStatus::Completed | SyncTaskStatus::Failed | SyncTaskStatus::Cancelled
        )
    }

    /// 迁移到 `to` 是否合法
    pub fn can_transition_to(&self, to: SyncTaskStatus) -> bool {
        use SyncTaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }

    /// 能够合法迁移到 `to` 的源状态集合，供存储层做单行CAS
    pub fn legal_sources(to: SyncTaskStatus) -> &'static [SyncTaskStatus] {
        use SyncTaskStatus::*;
        match to {
            Running => &[Pending],
            Completed => &[Running],
            Failed => &[Running],
            Cancelled => &[Pending, Running],
            Pending => &[],
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for SyncTaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SyncTaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "pending" => Ok(SyncTaskStatus::Pending),
            "running" => Ok(SyncTaskStatus::Running),
            "completed" => Ok(SyncTaskStatus::Completed),
            "failed" => Ok(SyncTaskStatus::Failed),
            "cancelled" => Ok(SyncTaskStatus::Cancelled),
            _ => Err(format!("Invalid sync task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SyncTaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 一次插件同步任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: String,
    pub plugin_name: String,
    pub task_type: SyncTaskType,
    pub status: SyncTaskStatus,
    /// 0-100，运行中单调不减
    pub progress: i32,
    pub records_processed: i64,
    pub total_records: i64,
    /// 有序去重的交易日列表
    pub trade_dates: Vec<NaiveDate>,
    /// 可选依赖是否全部就绪（硬依赖不就绪时任务不会被调起）
    pub dependencies_satisfied: bool,
    /// 已有分区数据也强制重写
    pub force_overwrite: bool,
    pub error_message: Option<String>,
    /// 所属执行记录，手动单任务没有
    pub execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncTask {
    pub fn new(plugin_name: &str, task_type: SyncTaskType, trade_dates: Vec<NaiveDate>) -> Self {
        let mut dates = trade_dates;
        dates.sort();
        dates.dedup();
        Self {
            id: Uuid::new_v4().to_string(),
            plugin_name: plugin_name.to_string(),
            task_type,
            status: SyncTaskStatus::Pending,
            progress: 0,
            records_processed: 0,
            total_records: 0,
            trade_dates: dates,
            dependencies_satisfied: true,
            force_overwrite: false,
            error_message: None,
            execution_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 幂等短路产生的合成完成任务：数据已存在，不执行任何写入
    pub fn synthetic_completed(
        plugin_name: &str,
        task_type: SyncTaskType,
        trade_dates: Vec<NaiveDate>,
    ) -> Self {
        let now = Utc::now();
        let mut task = Self::new(plugin_name, task_type, trade_dates);
        task.status = SyncTaskStatus::Completed;
        task.progress = 100;
        task.error_message = Some("数据已存在，跳过同步".to_string());
        task.started_at = Some(now);
        task.completed_at = Some(now);
        task
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, SyncTaskStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status, SyncTaskStatus::Completed)
    }

    pub fn update_status(&mut self, status: SyncTaskStatus) {
        self.status = status;
        match status {
            SyncTaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            SyncTaskStatus::Completed | SyncTaskStatus::Failed | SyncTaskStatus::Cancelled => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(Utc::now());
                }
            }
            SyncTaskStatus::Pending => {}
        }
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            Some((completed - started).num_milliseconds())
        } else {
            None
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "同步任务 (ID: {}, 插件: {}, 类型: {})",
            self.id,
            self.plugin_name,
            self.task_type.as_str()
        )
    }
}

/// 执行记录触发来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Scheduled,
    Manual,
    Group,
    Retry,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
            TriggerType::Group => "group",
            TriggerType::Retry => "retry",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TriggerType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TriggerType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            "group" => Ok(TriggerType::Group),
            "retry" => Ok(TriggerType::Retry),
            _ => Err(format!("Invalid trigger type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TriggerType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 执行记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Interrupted,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "skipped" => Ok(ExecutionStatus::Skipped),
            "interrupted" => Ok(ExecutionStatus::Interrupted),
            _ => Err(format!("Invalid execution status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 一次触发（定时/手动/分组/重试）的汇总记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub trigger_type: TriggerType,
    pub status: ExecutionStatus,
    pub skip_reason: Option<String>,
    pub total_plugins: i64,
    pub completed_plugins: i64,
    pub failed_plugins: i64,
    /// 按拓扑顺序排列的任务ID
    pub task_ids: Vec<String>,
    /// 按拓扑顺序排列的插件名，便于观测
    pub execution_order: Vec<String>,
    pub can_retry: bool,
    pub group_name: Option<String>,
    /// 重试记录指向被重试的原始记录
    pub parent_execution_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trigger_type,
            status: ExecutionStatus::Running,
            skip_reason: None,
            total_plugins: 0,
            completed_plugins: 0,
            failed_plugins: 0,
            task_ids: Vec::new(),
            execution_order: Vec::new(),
            can_retry: false,
            group_name: None,
            parent_execution_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// 非交易日等原因整体跳过的记录
    pub fn skipped(trigger_type: TriggerType, reason: &str) -> Self {
        let mut record = Self::new(trigger_type);
        record.status = ExecutionStatus::Skipped;
        record.skip_reason = Some(reason.to_string());
        record.completed_at = Some(Utc::now());
        record
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 汇总不变式：completed + failed 不得超过 total
    pub fn counters_consistent(&self) -> bool {
        self.completed_plugins + self.failed_plugins <= self.total_plugins
    }
}

/// 插件分组：一键触发一组插件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginGroup {
    pub id: String,
    pub name: String,
    pub plugin_names: Vec<String>,
    pub default_task_type: SyncTaskType,
    pub category: String,
    /// 预置分组随系统发布，只读
    pub is_predefined: bool,
    pub is_readonly: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginGroup {
    pub fn new(name: &str, plugin_names: Vec<String>, default_task_type: SyncTaskType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            plugin_names,
            default_task_type,
            category: "custom".to_string(),
            is_predefined: false,
            is_readonly: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 进程级并发预算，调度器每次准入决策都会读取
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub max_concurrent_tasks: usize,
    pub max_date_threads: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            max_date_threads: 8,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 {
            return Err("最大并发任务数必须大于0".to_string());
        }
        if self.max_date_threads == 0 {
            return Err("单任务日期并行度必须大于0".to_string());
        }
        Ok(())
    }
}

/// 定时调度配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// "HH:MM" 每日触发时间
    pub time: String,
    pub skip_non_trading_days: bool,
    /// 批量触发时是否连可选依赖一起展开
    pub include_optional_deps: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: "17:30".to_string(),
            skip_non_trading_days: true,
            include_optional_deps: false,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), String> {
        let valid_time = self.time.split_once(':').is_some_and(|(h, m)| {
            h.len() == 2
                && m.len() == 2
                && h.parse::<u32>().map_or(false, |h| h < 24)
                && m.parse::<u32>().map_or(false, |m| m < 60)
        });
        if !valid_time {
            return Err(format!("调度时间格式无效: {}", self.time));
        }
        Ok(())
    }
}

/// 任务列表查询条件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<SyncTaskStatus>,
    pub plugin_name: Option<String>,
    pub execution_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

/// 执行历史查询条件
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub days: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ExecutionStatus>,
    pub trigger_type: Option<TriggerType>,
}

/// 数仓分区存在性检查结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataExistsResult {
    pub existing: Vec<NaiveDate>,
    pub missing: Vec<NaiveDate>,
}

impl DataExistsResult {
    pub fn all_exist(&self) -> bool {
        self.missing.is_empty()
    }
}

/// 单插件触发请求，同时是缺数审计给出的回补建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
    pub plugin_name: String,
    pub task_type: SyncTaskType,
    #[serde(default)]
    pub trade_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub force_overwrite: bool,
}

/// 单插件缺数明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMissingData {
    pub plugin_name: String,
    pub category: String,
    pub latest_date: Option<NaiveDate>,
    pub missing_dates: Vec<NaiveDate>,
    pub suggestion: Option<TriggerSyncRequest>,
}

/// 缺数审计汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingDataSummary {
    pub generated_at: DateTime<Utc>,
    pub window_days: i64,
    pub total_missing_dates: usize,
    pub plugins: Vec<PluginMissingData>,
}
