//! REST接口测试
//!
//! 用内存仓储和脚本化执行器搭完整AppState，走Router做请求级断言。

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use datasync_api::{create_routes, AppState};
use datasync_dispatcher::test_utils::{
    InMemoryConfigRepository, InMemoryExecutionRepository, InMemoryGroupRepository,
    InMemoryTaskRepository, InMemoryWarehouse, ScriptedExecutor, TestCalendar,
};
use datasync_dispatcher::{ConcurrencyController, MissingDataAuditor, SyncScheduler, TaskRunner};
use datasync_domain::entities::{PluginGroup, SyncTaskType};
use datasync_domain::repositories::GroupRepository;
use datasync_registry::{builtin_catalog, PluginRegistry};

struct TestApp {
    router: Router,
    warehouse: Arc<InMemoryWarehouse>,
    group_repo: Arc<InMemoryGroupRepository>,
}

fn build_app() -> TestApp {
    let registry = Arc::new(PluginRegistry::load(builtin_catalog()).unwrap());
    let task_repo = Arc::new(InMemoryTaskRepository::new());
    let execution_repo = Arc::new(InMemoryExecutionRepository::new());
    let group_repo = Arc::new(InMemoryGroupRepository::new());
    let config_repo = Arc::new(InMemoryConfigRepository::new());
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let calendar = Arc::new(TestCalendar::all_trading());
    let executor = Arc::new(ScriptedExecutor::new(warehouse.clone()));

    let runner = Arc::new(TaskRunner::new(
        task_repo.clone(),
        warehouse.clone(),
        executor,
    ));
    let concurrency = Arc::new(ConcurrencyController::new(4));
    let scheduler = Arc::new(SyncScheduler::new(
        registry.clone(),
        task_repo.clone(),
        execution_repo.clone(),
        group_repo.clone(),
        config_repo.clone(),
        warehouse.clone(),
        calendar.clone(),
        runner,
        concurrency,
    ));
    let auditor = Arc::new(MissingDataAuditor::new(
        registry.clone(),
        warehouse.clone(),
        calendar,
        Duration::from_secs(60),
    ));

    let state = AppState {
        scheduler,
        auditor,
        registry,
        task_repo,
        execution_repo,
        group_repo: group_repo.clone(),
        config_repo,
    };
    TestApp {
        router: create_routes(state),
        warehouse,
        group_repo,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> Response {
    send(
        router,
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = build_app();
    let response = get(&app.router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "datasync");
}

#[tokio::test]
async fn test_list_plugins_with_filters() {
    let app = build_app();

    let response = get(&app.router, "/api/plugins").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["success"].as_bool().unwrap());
    assert_eq!(body["data"].as_array().unwrap().len(), 11);

    let response = get(&app.router, "/api/plugins?category=stock").await;
    let body = body_json(response).await;
    let plugins = body["data"].as_array().unwrap();
    assert!(!plugins.is_empty());
    assert!(plugins.iter().all(|p| p["category"] == "stock"));
}

#[tokio::test]
async fn test_dependency_graph_export() {
    let app = build_app();
    let response = get(&app.router, "/api/plugins/dependency-graph").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let graph = &body["data"]["graph"];
    assert_eq!(graph["daily_quote"], json!(["stock_basic"]));
    let reverse = &body["data"]["reverse_graph"];
    assert!(reverse["stock_basic"]
        .as_array()
        .unwrap()
        .contains(&json!("daily_quote")));
}

#[tokio::test]
async fn test_trigger_sync_short_circuits_when_data_exists() {
    let app = build_app();
    let today = Utc::now().date_naive();
    app.warehouse.seed("stock_basic", &[today]);

    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/trigger",
        json!({"plugin_name": "stock_basic", "task_type": "incremental"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["progress"], 100);
    assert_eq!(body["data"]["error_message"], "数据已存在，跳过同步");
}

#[tokio::test]
async fn test_trigger_sync_unknown_plugin_is_404() {
    let app = build_app();
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/trigger",
        json!({"plugin_name": "ghost", "task_type": "full"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "PLUGIN_NOT_FOUND");
}

#[tokio::test]
async fn test_trigger_sync_missing_dependency_is_conflict() {
    let app = build_app();
    // stock_basic无数据，daily_quote的硬依赖不满足
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/trigger",
        json!({"plugin_name": "daily_quote", "task_type": "incremental"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "DEPENDENCY_UNSATISFIED");
}

#[tokio::test]
async fn test_trigger_batch_returns_topological_order() {
    let app = build_app();
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/batch",
        json!({"plugin_names": ["money_flow"], "task_type": "full"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(
        body["data"]["execution_order"],
        json!(["stock_basic", "daily_quote", "money_flow"])
    );
    assert_eq!(body["data"]["total_plugins"], 3);
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_trigger_batch_include_optional_expands_optional_deps() {
    let app = build_app();

    // 缺省跟随调度配置（默认不含可选依赖），adj_factor不进展开
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/batch",
        json!({"plugin_names": ["derived_factor"], "task_type": "full"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(
        body["data"]["execution_order"],
        json!(["stock_basic", "daily_quote", "daily_basic", "derived_factor"])
    );

    // 请求体显式include_optional=true时连可选依赖一起传递展开
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/batch",
        json!({
            "plugin_names": ["derived_factor"],
            "task_type": "full",
            "include_optional": true
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(
        body["data"]["execution_order"],
        json!([
            "trade_calendar",
            "stock_basic",
            "daily_quote",
            "daily_basic",
            "adj_factor",
            "derived_factor"
        ])
    );
}

#[tokio::test]
async fn test_list_tasks_pagination_envelope() {
    let app = build_app();
    let today = Utc::now().date_naive();
    app.warehouse.seed("stock_basic", &[today]);
    for _ in 0..3 {
        let response = send_json(
            &app.router,
            "POST",
            "/api/sync/trigger",
            json!({"plugin_name": "stock_basic", "task_type": "incremental"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = get(&app.router, "/api/sync/tasks?page=1&page_size=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["total_pages"], 2);

    let response = get(&app.router, "/api/sync/tasks?status=completed").await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["total"], 3);
}

#[tokio::test]
async fn test_sync_config_roundtrip_and_validation() {
    let app = build_app();

    let response = get(&app.router, "/api/sync/config").await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["max_concurrent_tasks"], 4);
    assert_eq!(body["data"]["max_date_threads"], 8);

    let response = send_json(
        &app.router,
        "PUT",
        "/api/sync/config",
        json!({"max_concurrent_tasks": 2, "max_date_threads": 4}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_json(
        &app.router,
        "PUT",
        "/api/sync/config",
        json!({"max_concurrent_tasks": 0, "max_date_threads": 4}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schedule_config_rejects_bad_time() {
    let app = build_app();

    let response = get(&app.router, "/api/schedule/config").await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["time"], "17:30");

    let response = send_json(
        &app.router,
        "PUT",
        "/api/schedule/config",
        json!({
            "enabled": true,
            "time": "99:99",
            "skip_non_trading_days": true,
            "include_optional_deps": false
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_plugin_schedule() {
    let app = build_app();
    let response = send_json(
        &app.router,
        "PUT",
        "/api/schedule/plugins/daily_quote",
        json!({"schedule_enabled": false, "time": "18:00"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["schedule_enabled"], false);
    assert_eq!(body["data"]["schedule"]["time"], "18:00");

    let response = send_json(
        &app.router,
        "PUT",
        "/api/schedule/plugins/daily_quote",
        json!({"time": "25:00"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_group_crud_and_readonly_guard() {
    let app = build_app();

    let response = send_json(
        &app.router,
        "POST",
        "/api/groups",
        json!({
            "name": "自选股票",
            "plugin_names": ["stock_basic", "daily_quote"],
            "default_task_type": "incremental"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let group_id = body["data"]["id"].as_str().unwrap().to_string();

    let response = send_json(
        &app.router,
        "PUT",
        &format!("/api/groups/{group_id}"),
        json!({"name": "自选股票v2"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // 未知插件拒绝
    let response = send_json(
        &app.router,
        "POST",
        "/api/groups",
        json!({
            "name": "坏分组",
            "plugin_names": ["ghost"],
            "default_task_type": "full"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // 预置分组只读
    let mut predefined = PluginGroup::new(
        "股票日线",
        vec!["daily_quote".to_string()],
        SyncTaskType::Incremental,
    );
    predefined.is_predefined = true;
    predefined.is_readonly = true;
    app.group_repo.create(&predefined).await.unwrap();

    let response = send_json(
        &app.router,
        "PUT",
        &format!("/api/groups/{}", predefined.id),
        json!({"name": "改名"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "GROUP_READONLY");

    let response = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/groups/{}", predefined.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app.router,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/groups/{group_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_group_check_exists() {
    let app = build_app();
    let today = Utc::now().date_naive();
    app.warehouse.seed("stock_basic", &[today]);

    let group = PluginGroup::new(
        "基础数据",
        vec!["stock_basic".to_string(), "daily_quote".to_string()],
        SyncTaskType::Incremental,
    );
    app.group_repo.create(&group).await.unwrap();

    let response = send_json(
        &app.router,
        "POST",
        &format!("/api/groups/{}/check-exists", group.id),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    let stock = results.iter().find(|r| r["plugin_name"] == "stock_basic").unwrap();
    assert_eq!(stock["all_exist"], true);
    let quote = results.iter().find(|r| r["plugin_name"] == "daily_quote").unwrap();
    assert_eq!(quote["all_exist"], false);
}

#[tokio::test]
async fn test_missing_data_summary() {
    let app = build_app();
    let response = get(&app.router, "/api/missing-data?days=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["window_days"], 2);
    assert_eq!(body["data"]["plugins"].as_array().unwrap().len(), 11);

    let response = get(&app.router, "/api/missing-data?days=500").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_execution_history_and_detail() {
    let app = build_app();
    let today = Utc::now().date_naive();
    app.warehouse.seed("stock_basic", &[today]);

    // 合成完成的执行同步落终态，无需等待
    let response = send_json(
        &app.router,
        "POST",
        "/api/sync/batch",
        json!({"plugin_names": ["stock_basic"], "task_type": "incremental"}),
    )
    .await;
    let body = body_json(response).await;
    let execution_id = body["data"]["execution_id"].as_str().unwrap().to_string();

    let response = get(&app.router, "/api/schedule/history?days=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let response = get(&app.router, &format!("/api/schedule/execution/{execution_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["record"]["status"], "completed");
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 1);

    let response = get(&app.router, "/api/schedule/execution/unknown").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_unknown_execution_is_404() {
    let app = build_app();
    let response = send_json(&app.router, "POST", "/api/schedule/stop/ghost", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "EXECUTION_NOT_FOUND");
}
