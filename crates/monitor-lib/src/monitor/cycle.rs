//! Monitoring cycle orchestration
//!
//! Implements the scheduled unit of work: pull running batches, classify each
//! against its history, persist the classification, alert on stuck batches and
//! publish one consolidated report. Cycles never overlap; a request arriving
//! while a cycle runs is skipped. Scheduled cycles run in their own task, so a
//! panicking collaborator aborts that cycle only.

use super::report::ReportSink;
use super::state::{CycleFlag, CycleState};
use crate::detection::{AlertDispatcher, AlertSink, DetectionThresholds, DispatchOutcome, TrendAnalyzer};
use crate::health::{components, HealthRegistry};
use crate::history::HistoryStore;
use crate::models::{BatchOutcome, BatchSnapshot, CycleReport, HistoryRecord};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::source::SnapshotSource;
use anyhow::Result;
use chrono::Utc;
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default interval between cycles (30 minutes)
const DEFAULT_INTERVAL_SECS: u64 = 30 * 60;

/// Consecutive failed pulls after which the source is reported unhealthy
const SOURCE_FAILURES_UNHEALTHY: u32 = 3;

/// Configuration for the monitoring cycle
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Interval between scheduled cycles
    pub interval: Duration,
    /// Stuck classification thresholds
    pub thresholds: DetectionThresholds,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            thresholds: DetectionThresholds::default(),
        }
    }
}

/// Reasons a cycle did not produce a report
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("a monitoring cycle is already running")]
    AlreadyRunning,

    #[error("snapshot source failed: {0:#}")]
    Source(anyhow::Error),
}

/// Which step dropped a batch from a cycle
#[derive(Debug, Clone, Copy)]
enum BatchStage {
    Analyze,
    Persist,
}

impl BatchStage {
    fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Analyze => "analyze",
            BatchStage::Persist => "persist",
        }
    }
}

/// The monitoring cycle orchestrator
pub struct MonitoringCycle {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn HistoryStore>,
    analyzer: TrendAnalyzer,
    dispatcher: AlertDispatcher,
    reporter: Arc<dyn ReportSink>,
    config: CycleConfig,
    flag: CycleFlag,
    source_failures: AtomicU32,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl MonitoringCycle {
    pub fn state(&self) -> CycleState {
        self.flag.state()
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.store)
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Run cycles on the configured interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting batch monitoring loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = Arc::clone(&self);
                    match tokio::spawn(async move { cycle.run_cycle().await }).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "Scheduled cycle produced no report");
                        }
                        Err(e) if e.is_panic() => {
                            let payload = e.into_panic();
                            let message = panic_message(&*payload);
                            self.metrics.inc_cycles_aborted();
                            self.logger
                                .log_cycle_aborted(&format!("cycle panicked: {}", message));
                        }
                        Err(e) => {
                            warn!(error = %e, "Cycle task cancelled");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down batch monitoring loop");
                    break;
                }
            }
        }
    }

    /// Run one full cycle now
    ///
    /// Returns [`CycleError::AlreadyRunning`] without doing anything when
    /// another cycle holds the Running state.
    pub async fn run_cycle(&self) -> std::result::Result<CycleReport, CycleError> {
        let Some(_guard) = self.flag.try_acquire() else {
            self.metrics.inc_cycles_skipped();
            self.logger.log_cycle_skipped();
            return Err(CycleError::AlreadyRunning);
        };

        let start = Instant::now();
        let started_at = Utc::now();

        let poll = match self.source.poll(started_at).await {
            Ok(poll) => {
                self.source_failures.store(0, Ordering::SeqCst);
                self.health.set_healthy(components::SNAPSHOT_SOURCE).await;
                poll
            }
            Err(e) => {
                let message = format!("{:#}", e);
                let failures = self.source_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= SOURCE_FAILURES_UNHEALTHY {
                    self.health
                        .set_unhealthy(
                            components::SNAPSHOT_SOURCE,
                            format!("{} consecutive pulls failed: {}", failures, message),
                        )
                        .await;
                } else {
                    self.health
                        .set_degraded(components::SNAPSHOT_SOURCE, message.clone())
                        .await;
                }
                self.metrics.inc_cycles_aborted();
                self.logger.log_cycle_aborted(&message);
                return Err(CycleError::Source(e));
            }
        };

        let pending_work = poll.pending_work;
        if let Some(pending) = pending_work {
            self.metrics.set_pending_work(pending);
        }

        // Snapshots share the cycle start time so history stays ordered by check time
        let mut outcomes = Vec::with_capacity(poll.batches.len());
        let mut failed_batches = Vec::new();
        let mut persist_failures = 0usize;

        for snapshot in poll.batches {
            let snapshot = snapshot.with_check_time(started_at);
            let batch_code = snapshot.batch_code.clone();

            match self.process_batch(snapshot).await {
                Ok(outcome) => outcomes.push(outcome),
                Err((stage, error)) => {
                    if matches!(stage, BatchStage::Persist) {
                        persist_failures += 1;
                    }
                    self.metrics.inc_batch_errors();
                    self.logger
                        .log_batch_failed(&batch_code, stage.as_str(), &error);
                    failed_batches.push(batch_code);
                }
            }
        }

        if persist_failures > 0 && outcomes.is_empty() {
            self.health
                .set_unhealthy(components::HISTORY_STORE, "every history write failed last cycle")
                .await;
        } else if persist_failures > 0 {
            self.health
                .set_degraded(components::HISTORY_STORE, "history writes failed last cycle")
                .await;
        } else {
            self.health.set_healthy(components::HISTORY_STORE).await;
        }

        self.alert_stuck(&mut outcomes).await;

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            pending_work,
            batches: outcomes,
            failed_batches,
        };

        if let Err(e) = self.reporter.publish(&report).await {
            warn!(error = %e, "Failed to publish cycle report");
        }

        let elapsed = start.elapsed();
        self.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        self.metrics
            .set_cycle_counts(report.batches.len(), report.stuck_count());
        self.metrics.inc_cycles_completed();
        self.logger.log_cycle_completed(
            report.batches.len(),
            report.stuck_count(),
            report.alerts_sent(),
            report.failed_batches.len(),
            elapsed.as_millis(),
        );

        Ok(report)
    }

    /// Classify and persist one snapshot
    async fn process_batch(
        &self,
        snapshot: BatchSnapshot,
    ) -> std::result::Result<BatchOutcome, (BatchStage, String)> {
        let detection = self
            .analyzer
            .analyze(self.store.as_ref(), &snapshot)
            .await
            .map_err(|e| (BatchStage::Analyze, e.to_string()))?;

        let record = HistoryRecord::from_detection(snapshot, &detection);
        let record_id = self
            .store
            .append(&record)
            .await
            .map_err(|e| (BatchStage::Persist, e.to_string()))?;

        debug!(
            batch_code = %record.batch_code(),
            record_id = record_id,
            is_stuck = detection.is_stuck,
            "Batch classified"
        );

        if let Some(ref reason) = detection.reason {
            self.logger.log_batch_stuck(
                record.batch_code(),
                reason,
                detection.statistics.as_ref().map(|s| s.records_diff),
            );
        }

        Ok(BatchOutcome {
            snapshot: record.snapshot,
            detection,
            alert_sent: false,
        })
    }

    /// Dispatch alerts for stuck outcomes and flag the delivered records
    async fn alert_stuck(&self, outcomes: &mut [BatchOutcome]) {
        let mut any_failed = false;
        let mut any_sent = false;

        for outcome in outcomes.iter_mut().filter(|o| o.detection.is_stuck) {
            let batch_code = outcome.snapshot.batch_code.clone();

            match self
                .dispatcher
                .notify(&outcome.snapshot, &outcome.detection)
                .await
            {
                DispatchOutcome::Sent => {
                    any_sent = true;
                    outcome.alert_sent = true;
                    self.metrics.inc_alerts_sent();
                    self.logger.log_alert(&batch_code, true, "");

                    if let Err(e) = self
                        .store
                        .mark_alert_sent(&batch_code, outcome.snapshot.check_time)
                        .await
                    {
                        self.logger
                            .log_batch_failed(&batch_code, "mark_alert_sent", &e.to_string());
                    }
                }
                DispatchOutcome::Failed(error) => {
                    any_failed = true;
                    self.metrics.inc_alert_failures();
                    self.logger.log_alert(&batch_code, false, &error);
                }
                DispatchOutcome::Suppressed | DispatchOutcome::NotStuck => {}
            }
        }

        if any_failed {
            self.health
                .set_degraded(components::ALERT_SINK, "alert delivery failed last cycle")
                .await;
        } else if any_sent {
            self.health.set_healthy(components::ALERT_SINK).await;
        }
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for the monitoring cycle
pub struct MonitoringCycleBuilder {
    source: Option<Arc<dyn SnapshotSource>>,
    store: Option<Arc<dyn HistoryStore>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    reporter: Option<Arc<dyn ReportSink>>,
    health: Option<HealthRegistry>,
    instance: String,
    config: CycleConfig,
}

impl MonitoringCycleBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            alert_sink: None,
            reporter: None,
            health: None,
            instance: "batch-monitor".to_string(),
            config: CycleConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Defaults to logging reports when unset
    pub fn reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Share a health registry with the API layer
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Instance name attached to structured log events
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn thresholds(mut self, thresholds: DetectionThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn build(self) -> Result<MonitoringCycle> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Snapshot source is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("History store is required"))?;
        let alert_sink = self
            .alert_sink
            .ok_or_else(|| anyhow::anyhow!("Alert sink is required"))?;
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(super::report::LogReportSink));

        Ok(MonitoringCycle {
            source,
            store,
            analyzer: TrendAnalyzer::new(self.config.thresholds.clone()),
            dispatcher: AlertDispatcher::new(alert_sink),
            reporter,
            config: self.config,
            flag: CycleFlag::new(),
            source_failures: AtomicU32::new(0),
            health: self.health.unwrap_or_default(),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new(self.instance),
        })
    }
}

impl Default for MonitoringCycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::LogAlertSink;
    use crate::history::HistoryLog;
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl SnapshotSource for EmptySource {
        async fn list_running_batches(&self) -> Result<Vec<BatchSnapshot>> {
            Ok(vec![])
        }

        async fn count_pending_work(&self) -> Result<i64> {
            Ok(0)
        }
    }

    #[test]
    fn test_cycle_config_default() {
        let config = CycleConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1800));
        assert_eq!(config.thresholds, DetectionThresholds::default());
    }

    #[test]
    fn test_builder_requires_source() {
        let result = MonitoringCycleBuilder::new()
            .store(Arc::new(HistoryLog::in_memory()))
            .alert_sink(Arc::new(LogAlertSink))
            .build();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_cycle_still_reports() {
        let cycle = MonitoringCycleBuilder::new()
            .source(Arc::new(EmptySource))
            .store(Arc::new(HistoryLog::in_memory()))
            .alert_sink(Arc::new(LogAlertSink))
            .interval(Duration::from_secs(60))
            .build()
            .unwrap();

        let report = cycle.run_cycle().await.unwrap();
        assert!(report.batches.is_empty());
        assert_eq!(report.pending_work, Some(0));
        assert_eq!(cycle.state(), CycleState::Idle);
    }

    #[test]
    fn test_panic_message_reads_common_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("sink exploded");
        let formatted: Box<dyn Any + Send> = Box::new(format!("bad row {}", 7));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(&*literal), "sink exploded");
        assert_eq!(panic_message(&*formatted), "bad row 7");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
