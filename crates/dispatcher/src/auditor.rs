//! 缺数审计
//!
//! 只读巡检：对每个启用插件，按其调度频率和交易日历推导回看窗口内
//! 的期望日期集合，与数仓存在性做差集，给出可直接提交的回补建议。
//! 审计只建议插件自身，依赖展开交给触发链路。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use datasync_domain::entities::{
    MissingDataSummary, PluginMissingData, SyncTaskType, TriggerSyncRequest,
};
use datasync_domain::ports::{TradingCalendar, Warehouse};
use datasync_domain::{SyncError, SyncResult};
use datasync_registry::PluginRegistry;

const DEFAULT_WINDOW_DAYS: i64 = 30;

struct CachedSummary {
    generated: Instant,
    window_days: i64,
    summary: MissingDataSummary,
}

pub struct MissingDataAuditor {
    registry: Arc<PluginRegistry>,
    warehouse: Arc<dyn Warehouse>,
    calendar: Arc<dyn TradingCalendar>,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedSummary>>,
}

impl MissingDataAuditor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        warehouse: Arc<dyn Warehouse>,
        calendar: Arc<dyn TradingCalendar>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            warehouse,
            calendar,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    /// 查询缺数汇总，命中TTL缓存时直接返回
    pub async fn summary(
        &self,
        window_days: Option<i64>,
        force_refresh: bool,
    ) -> SyncResult<MissingDataSummary> {
        let window_days = window_days.unwrap_or(DEFAULT_WINDOW_DAYS);
        if window_days <= 0 || window_days > 365 {
            return Err(SyncError::invalid_params(format!(
                "回看窗口必须在1到365天之间: {window_days}"
            )));
        }

        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(cached) = cache.as_ref() {
                if cached.window_days == window_days
                    && cached.generated.elapsed() < self.cache_ttl
                {
                    debug!("缺数审计命中缓存");
                    return Ok(cached.summary.clone());
                }
            }
        }

        let summary = self.detect(window_days).await?;
        *cache = Some(CachedSummary {
            generated: Instant::now(),
            window_days,
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// 主动触发一次检测并刷新缓存
    pub async fn trigger_detection(&self, window_days: Option<i64>) -> SyncResult<MissingDataSummary> {
        self.summary(window_days, true).await
    }

    async fn detect(&self, window_days: i64) -> SyncResult<MissingDataSummary> {
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(window_days - 1);

        let mut plugins = Vec::new();
        let mut total_missing = 0usize;

        for plugin in self.registry.list(None, None).await {
            if !plugin.enabled {
                continue;
            }

            let expected = self
                .calendar
                .expected_dates(plugin.schedule.frequency, start, end)
                .await?;
            let check = self
                .warehouse
                .data_exists(&plugin.table_name, &expected)
                .await?;
            let latest_date = self.warehouse.latest_date(&plugin.table_name).await?;

            let suggestion = if check.missing.is_empty() {
                None
            } else {
                Some(TriggerSyncRequest {
                    plugin_name: plugin.name.clone(),
                    task_type: SyncTaskType::Backfill,
                    trade_dates: check.missing.clone(),
                    force_overwrite: false,
                })
            };

            total_missing += check.missing.len();
            plugins.push(PluginMissingData {
                plugin_name: plugin.name.clone(),
                category: plugin.category.clone(),
                latest_date,
                missing_dates: check.missing,
                suggestion,
            });
        }

        info!(
            "缺数审计完成: 窗口{}天, {}个插件, 共缺{}个日期分区",
            window_days,
            plugins.len(),
            total_missing
        );
        Ok(MissingDataSummary {
            generated_at: Utc::now(),
            window_days,
            total_missing_dates: total_missing,
            plugins,
        })
    }
}
