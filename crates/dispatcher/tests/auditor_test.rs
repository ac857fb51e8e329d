//! 缺数审计测试

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use datasync_dispatcher::test_utils::{InMemoryWarehouse, TestCalendar};
use datasync_dispatcher::MissingDataAuditor;
use datasync_domain::entities::SyncTaskType;
use datasync_domain::SyncError;
use datasync_registry::{builtin_catalog, PluginRegistry};

fn auditor(warehouse: Arc<InMemoryWarehouse>, ttl: Duration) -> MissingDataAuditor {
    let registry = Arc::new(PluginRegistry::load(builtin_catalog()).unwrap());
    MissingDataAuditor::new(
        registry,
        warehouse,
        Arc::new(TestCalendar::all_trading()),
        ttl,
    )
}

#[tokio::test]
async fn test_detects_missing_partitions_and_suggests_backfill() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let today = Utc::now().date_naive();
    // stock_basic齐3天，daily_quote缺最后一天
    let d0 = today - chrono::Duration::days(2);
    let d1 = today - chrono::Duration::days(1);
    warehouse.seed("stock_basic", &[d0, d1, today]);
    warehouse.seed("daily_quote", &[d0, d1]);

    let auditor = auditor(warehouse, Duration::from_secs(60));
    let summary = auditor.summary(Some(3), false).await.unwrap();

    assert_eq!(summary.window_days, 3);
    let stock = summary
        .plugins
        .iter()
        .find(|p| p.plugin_name == "stock_basic")
        .unwrap();
    assert!(stock.missing_dates.is_empty());
    assert!(stock.suggestion.is_none());
    assert_eq!(stock.latest_date, Some(today));

    let quote = summary
        .plugins
        .iter()
        .find(|p| p.plugin_name == "daily_quote")
        .unwrap();
    assert_eq!(quote.missing_dates, vec![today]);
    assert_eq!(quote.latest_date, Some(d1));

    let suggestion = quote.suggestion.as_ref().unwrap();
    assert_eq!(suggestion.plugin_name, "daily_quote");
    assert_eq!(suggestion.task_type, SyncTaskType::Backfill);
    assert_eq!(suggestion.trade_dates, vec![today]);
    assert!(!suggestion.force_overwrite);
}

#[tokio::test]
async fn test_cache_hit_until_forced_refresh() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let auditor = auditor(warehouse.clone(), Duration::from_secs(3600));

    let first = auditor.summary(Some(2), false).await.unwrap();
    let missing_before = first.total_missing_dates;
    assert!(missing_before > 0);

    // 数仓补齐后缓存命中仍返回旧结果
    let today = Utc::now().date_naive();
    for plugin in builtin_catalog() {
        warehouse.seed(&plugin.table_name, &[today - chrono::Duration::days(1), today]);
    }
    let cached = auditor.summary(Some(2), false).await.unwrap();
    assert_eq!(cached.total_missing_dates, missing_before);

    // 强制刷新看到最新状态
    let refreshed = auditor.trigger_detection(Some(2)).await.unwrap();
    assert_eq!(refreshed.total_missing_dates, 0);
}

#[tokio::test]
async fn test_window_validation() {
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let auditor = auditor(warehouse, Duration::from_secs(60));

    assert!(matches!(
        auditor.summary(Some(0), false).await.unwrap_err(),
        SyncError::InvalidParams(_)
    ));
    assert!(matches!(
        auditor.summary(Some(400), false).await.unwrap_err(),
        SyncError::InvalidParams(_)
    ));
}
