//! Batch Monitor - stuck batch detection daemon
//!
//! Periodically samples running batches, keeps their history, and alerts on
//! batches that stall or run critically slow.

use anyhow::{Context, Result};
use batch_monitor::{api, config::MonitorConfig, sinks::WebhookAlertSink};
use monitor_lib::{
    detection::{AlertSink, LogAlertSink},
    health::{components, HealthRegistry},
    history::HistoryLog,
    monitor::MonitoringCycleBuilder,
    observability::StructuredLogger,
    source::JsonFileSource,
    MonitorService,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting batch-monitor");

    let config = MonitorConfig::load()?;
    info!(
        node_name = %config.node_name,
        snapshot_path = %config.snapshot_path.display(),
        history_path = %config.history_path.display(),
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SNAPSHOT_SOURCE).await;
    health_registry.register(components::HISTORY_STORE).await;
    health_registry.register(components::ALERT_SINK).await;

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(MONITOR_VERSION, config.cycle_interval_secs);

    let store = HistoryLog::open(config.history_log())
        .await
        .context("Failed to open history log")?;

    let alert_sink: Arc<dyn AlertSink> = match config.alert_webhook_url {
        Some(ref url) => Arc::new(WebhookAlertSink::new(url)?),
        None => {
            warn!("No alert webhook configured, stuck alerts will only be logged");
            Arc::new(LogAlertSink)
        }
    };

    let cycle = MonitoringCycleBuilder::new()
        .source(Arc::new(JsonFileSource::new(&config.snapshot_path)))
        .store(Arc::new(store))
        .alert_sink(alert_sink)
        .health(health_registry.clone())
        .instance(config.node_name.clone())
        .interval(config.cycle_interval())
        .thresholds(config.thresholds())
        .build()?;
    let cycle = Arc::new(cycle);

    let service = MonitorService::new(Arc::clone(&cycle));
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), service));

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor_handle = tokio::spawn(Arc::clone(&cycle).run(shutdown_rx));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // Let an in-flight cycle finish before exiting
    let _ = shutdown_tx.send(());
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Monitoring loop ended abnormally");
    }
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}
