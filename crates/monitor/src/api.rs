//! HTTP API for health checks, Prometheus metrics and monitor operations

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use monitor_lib::{
    health::{ComponentStatus, HealthRegistry},
    monitor::CycleError,
    MonitorService,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default statistics window (24 hours)
const DEFAULT_WINDOW_MINUTES: u64 = 24 * 60;

/// Default and maximum history page sizes
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub service: MonitorService,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, service: MonitorService) -> Self {
        Self {
            health_registry,
            service,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub batch_code: Option<String>,
    pub window_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub batch_code: Option<String>,
    pub limit: Option<usize>,
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

/// Health check response - 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still cycling
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Per-batch statistics over a trailing window
async fn statistics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatisticsQuery>,
) -> Response {
    let minutes = query.window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
    let window = Duration::from_secs(minutes.saturating_mul(60));

    match state
        .service
        .get_batch_statistics(query.batch_code.as_deref(), window)
        .await
    {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

/// Latest history records, newest first
async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    match state
        .service
        .get_recent_history(query.batch_code.as_deref(), limit)
        .await
    {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Trigger a monitoring cycle outside the schedule
async fn run_cycle(State(state): State<Arc<AppState>>) -> Response {
    match state.service.run_cycle_manually().await {
        Ok(report) => Json(report).into_response(),
        Err(e @ CycleError::AlreadyRunning) => error_response(StatusCode::CONFLICT, e),
        Err(e @ CycleError::Source(_)) => {
            warn!(error = %e, "Manual cycle aborted");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/statistics", get(statistics))
        .route("/api/v1/history", get(history))
        .route("/api/v1/cycles", post(run_cycle))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
