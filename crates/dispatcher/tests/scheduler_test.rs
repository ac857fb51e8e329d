//! 调度器端到端测试（内存仓储 + 脚本化执行器）

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use datasync_dispatcher::test_utils::{
    InMemoryConfigRepository, InMemoryExecutionRepository, InMemoryGroupRepository,
    InMemoryTaskRepository, InMemoryWarehouse, ScriptedExecutor, TestCalendar,
};
use datasync_dispatcher::{ConcurrencyController, SyncScheduler, TaskRunner};
use datasync_domain::entities::{
    ExecutionStatus, PluginGroup, SyncConfig, SyncTaskStatus, SyncTaskType, TriggerSyncRequest,
    TriggerType,
};
use datasync_domain::repositories::{ExecutionRepository, GroupRepository, TaskRepository};
use datasync_domain::SyncError;
use datasync_registry::{builtin_catalog, PluginRegistry};

struct Harness {
    scheduler: Arc<SyncScheduler>,
    task_repo: Arc<InMemoryTaskRepository>,
    execution_repo: Arc<InMemoryExecutionRepository>,
    group_repo: Arc<InMemoryGroupRepository>,
    warehouse: Arc<InMemoryWarehouse>,
    executor: Arc<ScriptedExecutor>,
}

fn build_harness(sync_config: SyncConfig, delay_ms: u64, trading: bool) -> Harness {
    let registry = Arc::new(PluginRegistry::load(builtin_catalog()).unwrap());
    let task_repo = Arc::new(InMemoryTaskRepository::new());
    let execution_repo = Arc::new(InMemoryExecutionRepository::new());
    let group_repo = Arc::new(InMemoryGroupRepository::new());
    let config_repo = Arc::new(InMemoryConfigRepository::with_sync_config(sync_config.clone()));
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let executor = Arc::new(
        ScriptedExecutor::new(warehouse.clone()).with_delay(Duration::from_millis(delay_ms)),
    );
    let calendar = Arc::new(if trading {
        TestCalendar::all_trading()
    } else {
        TestCalendar::closed()
    });
    let runner = Arc::new(TaskRunner::new(
        task_repo.clone(),
        warehouse.clone(),
        executor.clone(),
    ));
    let concurrency = Arc::new(ConcurrencyController::new(sync_config.max_concurrent_tasks));

    let scheduler = Arc::new(SyncScheduler::new(
        registry,
        task_repo.clone(),
        execution_repo.clone(),
        group_repo.clone(),
        config_repo,
        warehouse.clone(),
        calendar,
        runner,
        concurrency,
    ));

    Harness {
        scheduler,
        task_repo,
        execution_repo,
        group_repo,
        warehouse,
        executor,
    }
}

fn harness() -> Harness {
    build_harness(SyncConfig::default(), 0, true)
}

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

async fn wait_finished(
    harness: &Harness,
    execution_id: &str,
) -> datasync_domain::entities::ExecutionRecord {
    for _ in 0..200 {
        let record = harness
            .execution_repo
            .get_by_id(execution_id)
            .await
            .unwrap()
            .unwrap();
        if record.is_finished() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("执行 {execution_id} 在超时前未结束");
}

#[tokio::test]
async fn test_trigger_single_runs_to_completion() {
    let h = harness();
    let record = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "stock_basic".to_string(),
            task_type: SyncTaskType::Incremental,
            trade_dates: vec![d("2026-08-20"), d("2026-08-21")],
            force_overwrite: false,
        })
        .await
        .unwrap();
    assert_eq!(record.trigger_type, TriggerType::Manual);
    assert_eq!(record.total_plugins, 1);

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.completed_plugins, 1);
    assert_eq!(finished.failed_plugins, 0);
    assert!(!finished.can_retry);

    assert!(h.warehouse.has_partition("stock_basic", d("2026-08-20")));
    assert!(h.warehouse.has_partition("stock_basic", d("2026-08-21")));

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, SyncTaskStatus::Completed);
    assert_eq!(tasks[0].progress, 100);
}

#[tokio::test]
async fn test_trigger_single_short_circuits_when_data_exists() {
    let h = harness();
    h.warehouse.seed("stock_basic", &[d("2026-08-20")]);

    let record = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "stock_basic".to_string(),
            task_type: SyncTaskType::Incremental,
            trade_dates: vec![d("2026-08-20")],
            force_overwrite: false,
        })
        .await
        .unwrap();

    // 合成完成任务，不经过派发循环
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.completed_plugins, 1);
    assert!(h.executor.calls().is_empty());

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    assert_eq!(tasks[0].status, SyncTaskStatus::Completed);
    assert_eq!(
        tasks[0].error_message.as_deref(),
        Some("数据已存在，跳过同步")
    );
}

#[tokio::test]
async fn test_force_overwrite_resyncs_existing_partitions() {
    let h = harness();
    h.warehouse.seed("stock_basic", &[d("2026-08-20")]);

    let record = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "stock_basic".to_string(),
            task_type: SyncTaskType::Full,
            trade_dates: vec![d("2026-08-20")],
            force_overwrite: true,
        })
        .await
        .unwrap();

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(h.executor.calls().len(), 1);
}

#[tokio::test]
async fn test_trigger_single_rejects_missing_hard_dependency() {
    let h = harness();
    // daily_quote硬依赖stock_basic，数仓里没有数据
    let err = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "daily_quote".to_string(),
            task_type: SyncTaskType::Incremental,
            trade_dates: vec![d("2026-08-20")],
            force_overwrite: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DependencyUnsatisfied(_)));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_batch_respects_topological_order() {
    let h = harness();
    let record = h
        .scheduler
        .trigger_batch(
            &["money_flow".to_string()],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            true,
            None,
        )
        .await
        .unwrap();

    // 传递展开: money_flow -> daily_quote -> stock_basic
    assert_eq!(record.total_plugins, 3);
    assert_eq!(
        record.execution_order,
        vec!["stock_basic", "daily_quote", "money_flow"]
    );

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.completed_plugins, 3);

    // 实际执行顺序也必须满足依赖先行
    let order = h.executor.called_plugins();
    let pos = |name: &str| order.iter().position(|p| p == name).unwrap();
    assert!(pos("stock_basic") < pos("daily_quote"));
    assert!(pos("daily_quote") < pos("money_flow"));
}

#[tokio::test]
async fn test_failed_dependency_cascades_cancellation() {
    let h = harness();
    h.executor.fail_plugin("stock_basic");

    let record = h
        .scheduler
        .trigger_batch(
            &["money_flow".to_string()],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            true,
            None,
        )
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;

    assert_eq!(finished.status, ExecutionStatus::Failed);
    assert_eq!(finished.failed_plugins, 1);
    assert_eq!(finished.completed_plugins, 0);
    assert!(finished.can_retry);

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    let by_plugin = |name: &str| tasks.iter().find(|t| t.plugin_name == name).unwrap();

    assert_eq!(by_plugin("stock_basic").status, SyncTaskStatus::Failed);
    let quote = by_plugin("daily_quote");
    assert_eq!(quote.status, SyncTaskStatus::Cancelled);
    assert_eq!(
        quote.error_message.as_deref(),
        Some("blocked by failed dependency: stock_basic")
    );
    // 级联继续向下游传播
    let flow = by_plugin("money_flow");
    assert_eq!(flow.status, SyncTaskStatus::Cancelled);
    assert_eq!(
        flow.error_message.as_deref(),
        Some("blocked by failed dependency: daily_quote")
    );

    // 汇总不变式: completed + failed + cancelled == total
    let cancelled = tasks
        .iter()
        .filter(|t| t.status == SyncTaskStatus::Cancelled)
        .count() as i64;
    assert_eq!(
        finished.completed_plugins + finished.failed_plugins + cancelled,
        finished.total_plugins
    );
}

#[tokio::test]
async fn test_optional_dependency_failure_does_not_cascade() {
    let h = harness();
    h.executor.fail_plugin("trade_calendar");

    // daily_basic: 硬依赖stock_basic, 可选依赖trade_calendar
    let record = h
        .scheduler
        .trigger_batch(
            &[
                "trade_calendar".to_string(),
                "stock_basic".to_string(),
                "daily_basic".to_string(),
            ],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            false,
            None,
        )
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;

    assert_eq!(finished.status, ExecutionStatus::Failed);
    assert_eq!(finished.failed_plugins, 1);
    assert_eq!(finished.completed_plugins, 2);

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    let basic = tasks
        .iter()
        .find(|t| t.plugin_name == "daily_basic")
        .unwrap();
    assert_eq!(basic.status, SyncTaskStatus::Completed);
    assert!(!basic.dependencies_satisfied);
}

#[tokio::test]
async fn test_example_scenario_daily_basic_blocks_derived_factor() {
    let h = harness();
    h.executor.fail_plugin("daily_basic");

    let record = h
        .scheduler
        .trigger_batch(
            &["derived_factor".to_string()],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            true,
            None,
        )
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;

    assert_eq!(finished.status, ExecutionStatus::Failed);

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    let derived = tasks
        .iter()
        .find(|t| t.plugin_name == "derived_factor")
        .unwrap();
    assert_eq!(derived.status, SyncTaskStatus::Cancelled);
    assert_eq!(
        derived.error_message.as_deref(),
        Some("blocked by failed dependency: daily_basic")
    );
    // 兄弟插件不受影响
    let quote = tasks
        .iter()
        .find(|t| t.plugin_name == "daily_quote")
        .unwrap();
    assert_eq!(quote.status, SyncTaskStatus::Completed);
}

#[tokio::test]
async fn test_partial_retry_defaults_to_failed_subset() {
    let h = harness();
    h.executor.fail_plugin("daily_basic");

    let record = h
        .scheduler
        .trigger_batch(
            &["derived_factor".to_string()],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            true,
            None,
        )
        .await
        .unwrap();
    let original = wait_finished(&h, &record.id).await;
    assert!(original.can_retry);

    h.executor.clear_failures();
    let retry = h
        .scheduler
        .partial_retry(&record.id, None)
        .await
        .unwrap();
    assert_eq!(retry.trigger_type, TriggerType::Retry);
    assert_eq!(retry.parent_execution_id.as_deref(), Some(record.id.as_str()));
    assert_eq!(retry.total_plugins, 1);
    assert_eq!(retry.execution_order, vec!["daily_basic"]);

    let retried = wait_finished(&h, &retry.id).await;
    assert_eq!(retried.status, ExecutionStatus::Completed);

    // 原记录保持不变
    let untouched = h
        .execution_repo
        .get_by_id(&record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, ExecutionStatus::Failed);
    assert_eq!(untouched.failed_plugins, 1);
}

#[tokio::test]
async fn test_partial_retry_rejects_foreign_plugin() {
    let h = harness();
    h.executor.fail_plugin("stock_basic");
    let record = h
        .scheduler
        .trigger_batch(
            &["stock_basic".to_string()],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            false,
            None,
        )
        .await
        .unwrap();
    wait_finished(&h, &record.id).await;

    let err = h
        .scheduler
        .partial_retry(&record.id, Some(&["index_basic".to_string()]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidParams(_)));
}

#[tokio::test]
async fn test_retry_single_task() {
    let h = harness();
    h.executor.fail_plugin("index_basic");
    let record = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "index_basic".to_string(),
            task_type: SyncTaskType::Incremental,
            trade_dates: vec![d("2026-08-20")],
            force_overwrite: false,
        })
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Failed);

    h.executor.clear_failures();
    let task_id = finished.task_ids[0].clone();
    let retry = h.scheduler.retry_task(&task_id).await.unwrap();
    assert_eq!(retry.trigger_type, TriggerType::Retry);

    let retried = wait_finished(&h, &retry.id).await;
    assert_eq!(retried.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let config = SyncConfig {
        max_concurrent_tasks: 2,
        max_date_threads: 1,
    };
    let h = build_harness(config, 50, true);

    // 四个互不依赖的插件，单日期任务
    let record = h
        .scheduler
        .trigger_batch(
            &[
                "trade_calendar".to_string(),
                "stock_basic".to_string(),
                "index_basic".to_string(),
                "etf_fund_basic".to_string(),
            ],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            false,
            None,
        )
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;

    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.completed_plugins, 4);
    assert!(
        h.executor.peak_concurrency() <= 2,
        "并发峰值 {} 超过上限",
        h.executor.peak_concurrency()
    );
}

#[tokio::test]
async fn test_date_level_idempotence_skips_existing_partitions() {
    let h = harness();
    h.warehouse.seed("stock_basic", &[d("2026-08-20")]);

    let record = h
        .scheduler
        .trigger_single(&TriggerSyncRequest {
            plugin_name: "stock_basic".to_string(),
            task_type: SyncTaskType::Incremental,
            trade_dates: vec![d("2026-08-20"), d("2026-08-21")],
            force_overwrite: false,
        })
        .await
        .unwrap();
    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);

    // 只补缺失日期
    let calls = h.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("stock_basic".to_string(), d("2026-08-21")));
}

#[tokio::test]
async fn test_stop_cancels_pending_and_interrupts() {
    let config = SyncConfig {
        max_concurrent_tasks: 1,
        max_date_threads: 1,
    };
    let h = build_harness(config, 200, true);

    let record = h
        .scheduler
        .trigger_batch(
            &[
                "trade_calendar".to_string(),
                "stock_basic".to_string(),
                "index_basic".to_string(),
            ],
            SyncTaskType::Incremental,
            &[d("2026-08-20")],
            false,
            false,
            None,
        )
        .await
        .unwrap();

    // 等第一个任务进入running
    tokio::time::sleep(Duration::from_millis(80)).await;
    h.scheduler.stop(&record.id).await.unwrap();

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Interrupted);

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    let completed = tasks
        .iter()
        .filter(|t| t.status == SyncTaskStatus::Completed)
        .count();
    let cancelled = tasks
        .iter()
        .filter(|t| t.status == SyncTaskStatus::Cancelled)
        .count();
    // 在途任务自然跑完，其余pending被取消
    assert!(completed >= 1);
    assert!(cancelled >= 1);
    assert_eq!(completed + cancelled, tasks.len());
}

#[tokio::test]
async fn test_trigger_group_uses_group_defaults() {
    let h = harness();
    let group = h
        .group_repo
        .create(&PluginGroup::new(
            "股票日线",
            vec!["daily_quote".to_string()],
            SyncTaskType::Full,
        ))
        .await
        .unwrap();

    let record = h
        .scheduler
        .trigger_group(&group.id, &[d("2026-08-20")], false)
        .await
        .unwrap();
    assert_eq!(record.trigger_type, TriggerType::Group);
    assert_eq!(record.group_name.as_deref(), Some("股票日线"));
    // 依赖展开后包含stock_basic
    assert_eq!(record.total_plugins, 2);

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);

    let tasks = h.task_repo.get_by_execution(&record.id).await.unwrap();
    assert!(tasks.iter().all(|t| t.task_type == SyncTaskType::Full));
}

#[tokio::test]
async fn test_schedule_skips_non_trading_day() {
    let h = build_harness(SyncConfig::default(), 0, false);
    let record = h.scheduler.trigger_schedule().await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Skipped);
    assert_eq!(record.skip_reason.as_deref(), Some("非交易日"));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_schedule_triggers_all_candidates_on_trading_day() {
    let h = harness();
    let record = h.scheduler.trigger_schedule().await.unwrap();
    assert_eq!(record.trigger_type, TriggerType::Scheduled);
    assert_eq!(record.total_plugins, 11);

    let finished = wait_finished(&h, &record.id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.completed_plugins, 11);
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let h = harness();
    let task = datasync_domain::entities::SyncTask::new(
        "stock_basic",
        SyncTaskType::Incremental,
        vec![d("2026-08-20")],
    );
    h.task_repo.create(&task).await.unwrap();

    let cancelled = h.scheduler.cancel_task(&task.id).await.unwrap();
    assert_eq!(cancelled.status, SyncTaskStatus::Cancelled);

    let err = h.scheduler.cancel_task(&task.id).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidParams(_)));
}

#[tokio::test]
async fn test_recover_interrupted_after_restart() {
    let h = harness();
    let mut running = datasync_domain::entities::SyncTask::new(
        "stock_basic",
        SyncTaskType::Incremental,
        vec![d("2026-08-20")],
    );
    running.execution_id = None;
    h.task_repo.create(&running).await.unwrap();
    h.task_repo
        .transition(&running.id, SyncTaskStatus::Running, None)
        .await
        .unwrap();

    let pending = datasync_domain::entities::SyncTask::new(
        "index_basic",
        SyncTaskType::Incremental,
        vec![d("2026-08-20")],
    );
    h.task_repo.create(&pending).await.unwrap();

    h.scheduler.recover_interrupted().await.unwrap();

    let failed = h.task_repo.get_by_id(&running.id).await.unwrap().unwrap();
    assert_eq!(failed.status, SyncTaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("进程重启，任务中断"));

    let cancelled = h.task_repo.get_by_id(&pending.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, SyncTaskStatus::Cancelled);
}

#[tokio::test]
async fn test_update_sync_config_resizes_concurrency() {
    let h = harness();
    h.scheduler
        .update_sync_config(&SyncConfig {
            max_concurrent_tasks: 9,
            max_date_threads: 2,
        })
        .await
        .unwrap();
    assert_eq!(h.scheduler.concurrency().limit(), 9);

    let err = h
        .scheduler
        .update_sync_config(&SyncConfig {
            max_concurrent_tasks: 0,
            max_date_threads: 2,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidParams(_)));
}
