//! 外部协作方端口
//!
//! 交易日历、列存数仓和插件执行器都是编排器之外的协作方，
//! 这里只约定接口，具体实现由infrastructure或真实适配器提供。

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::entities::{ColumnDef, DataExistsResult, Plugin, ScheduleFrequency, SyncTaskType};
use crate::errors::SyncResult;

/// 交易日历
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    async fn is_trading_day(&self, date: NaiveDate) -> SyncResult<bool>;
    /// [start, end] 闭区间内的交易日，升序
    async fn trading_days_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<NaiveDate>>;

    /// 按插件调度频率展开期望日期集合
    async fn expected_dates(
        &self,
        frequency: ScheduleFrequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<NaiveDate>> {
        match frequency {
            ScheduleFrequency::Daily => {
                let mut dates = Vec::new();
                let mut cur = start;
                while cur <= end {
                    dates.push(cur);
                    cur = cur.succ_opt().ok_or_else(|| {
                        crate::errors::SyncError::Internal("日期越界".to_string())
                    })?;
                }
                Ok(dates)
            }
            ScheduleFrequency::Weekday => self.trading_days_between(start, end).await,
        }
    }
}

/// 列存数仓的只读查询面
///
/// 编排器只做存在性/水位检查，分区写入属于插件执行器的职责。
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// 检查指定日期分区是否已有数据
    async fn data_exists(&self, table: &str, dates: &[NaiveDate]) -> SyncResult<DataExistsResult>;
    /// 表内最新的trade_date水位
    async fn latest_date(&self, table: &str) -> SyncResult<Option<NaiveDate>>;
    async fn describe_table(&self, table: &str) -> SyncResult<Vec<ColumnDef>>;
    /// 为插件建表（幂等），由调度器在首次执行前调用
    async fn ensure_table(&self, plugin: &Plugin) -> SyncResult<()>;
}

/// 插件执行器：真正的抓取/转换/写入逻辑
///
/// 对编排器不透明，编排器只观测每个日期分区的成功/失败与行数。
/// 实现必须满足按日期分区幂等：同一日期重复执行结果一致。
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// 同步单个日期分区，返回写入行数
    async fn sync_date(
        &self,
        plugin: &Plugin,
        task_type: SyncTaskType,
        date: NaiveDate,
    ) -> SyncResult<u64>;
}
