//! Integration tests for the monitor API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use batch_monitor::api::{create_router, AppState};
use chrono::{Duration as ChronoDuration, Utc};
use monitor_lib::{
    detection::LogAlertSink,
    health::{components, HealthRegistry},
    history::HistoryLog,
    monitor::MonitoringCycleBuilder,
    source::SnapshotSource,
    BatchSnapshot, MonitorMetrics, MonitorService,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Source returning one long-running batch, or failing on demand
#[derive(Default)]
struct StubSource {
    fail: AtomicBool,
}

#[async_trait]
impl SnapshotSource for StubSource {
    async fn list_running_batches(&self) -> anyhow::Result<Vec<BatchSnapshot>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("batch status query timed out");
        }
        let now = Utc::now();
        let start = now - ChronoDuration::minutes(30);
        Ok(vec![BatchSnapshot::new(
            "LOAD_ORDERS",
            now,
            start,
            start.date_naive(),
            18_000,
            1800,
        )])
    }

    async fn count_pending_work(&self) -> anyhow::Result<i64> {
        Ok(7)
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<StubSource>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SNAPSHOT_SOURCE).await;
    health_registry.register(components::HISTORY_STORE).await;
    health_registry.register(components::ALERT_SINK).await;

    // Ensure metrics are registered before /metrics is scraped
    let _metrics = MonitorMetrics::new();

    let source = Arc::new(StubSource::default());
    let cycle = MonitoringCycleBuilder::new()
        .source(source.clone())
        .store(Arc::new(HistoryLog::in_memory()))
        .alert_sink(Arc::new(LogAlertSink))
        .health(health_registry.clone())
        .instance("test-node")
        .build()
        .unwrap();

    let service = MonitorService::new(Arc::new(cycle));
    let state = Arc::new(AppState::new(health_registry, service));
    let router = create_router(state.clone());

    (router, state, source)
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _source) = setup_test_app().await;

    let (status, health) = send(app, "GET", "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _source) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::SNAPSHOT_SOURCE, "Last pull failed")
        .await;

    let (status, health) = send(app, "GET", "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _source) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::HISTORY_STORE, "Disk full")
        .await;

    let (status, health) = send(app, "GET", "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state, _source) = setup_test_app().await;

    // Not ready until startup completes
    let (status, readiness) = send(app.clone(), "GET", "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, readiness) = send(app, "GET", "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _source) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("batch_monitor_cycles_completed_total"));
    assert!(text.contains("batch_monitor_stuck_batches"));
}

#[tokio::test]
async fn test_manual_cycle_returns_report() {
    let (app, _state, _source) = setup_test_app().await;

    let (status, report) = send(app, "POST", "/api/v1/cycles").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["pending_work"], 7);
    assert_eq!(report["batches"].as_array().unwrap().len(), 1);
    assert_eq!(report["batches"][0]["snapshot"]["batch_code"], "LOAD_ORDERS");
}

#[tokio::test]
async fn test_manual_cycle_returns_502_when_source_fails() {
    let (app, state, source) = setup_test_app().await;
    source.fail.store(true, Ordering::SeqCst);

    let (status, body) = send(app, "POST", "/api/v1/cycles").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("batch status query timed out"));

    let source_health = state
        .health_registry
        .component(components::SNAPSHOT_SOURCE)
        .await
        .unwrap();
    assert_ne!(source_health.status, monitor_lib::ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_history_lists_recorded_checks() {
    let (app, _state, _source) = setup_test_app().await;

    let (status, _) = send(app.clone(), "POST", "/api/v1/cycles").await;
    assert_eq!(status, StatusCode::OK);

    let (status, records) = send(app.clone(), "GET", "/api/v1/history?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["batch_code"], "LOAD_ORDERS");
    assert_eq!(records[0]["is_stuck"], false);

    let (status, records) = send(app, "GET", "/api/v1/history?batch_code=OTHER").await;
    assert_eq!(status, StatusCode::OK);
    assert!(records.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_statistics_summarize_window() {
    let (app, _state, _source) = setup_test_app().await;

    let (status, _) = send(app.clone(), "POST", "/api/v1/cycles").await;
    assert_eq!(status, StatusCode::OK);

    let (status, summaries) = send(
        app,
        "GET",
        "/api/v1/statistics?batch_code=LOAD_ORDERS&window_minutes=60",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["batch_code"], "LOAD_ORDERS");
    assert_eq!(summaries[0]["total_checks"], 1);
    assert_eq!(summaries[0]["max_records"], 18_000);
    assert_eq!(summaries[0]["stuck_count"], 0);
}

#[tokio::test]
async fn test_statistics_rejects_unrepresentable_window() {
    let (app, _state, _source) = setup_test_app().await;

    let uri = format!("/api/v1/statistics?window_minutes={}", u64::MAX);
    let (status, body) = send(app, "GET", &uri).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
