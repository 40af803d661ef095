//! Observability infrastructure for the batch monitor
//!
//! Provides:
//! - Prometheus metrics (cycle duration, batches observed, stuck batches, alerts)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cycle_duration_seconds: Histogram,
    batches_observed: IntGauge,
    stuck_batches: IntGauge,
    pending_work: IntGauge,
    cycles_completed: IntCounter,
    cycles_skipped: IntCounter,
    cycles_aborted: IntCounter,
    batch_errors: IntCounter,
    alerts_sent: IntCounter,
    alert_failures: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "batch_monitor_cycle_duration_seconds",
                "Time spent running one monitoring cycle",
                CYCLE_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            batches_observed: register_int_gauge!(
                "batch_monitor_batches_observed",
                "Number of running batches observed in the last cycle"
            )
            .expect("Failed to register batches_observed"),

            stuck_batches: register_int_gauge!(
                "batch_monitor_stuck_batches",
                "Number of batches classified as stuck in the last cycle"
            )
            .expect("Failed to register stuck_batches"),

            pending_work: register_int_gauge!(
                "batch_monitor_pending_work",
                "Pending work reported by the snapshot source"
            )
            .expect("Failed to register pending_work"),

            cycles_completed: register_int_counter!(
                "batch_monitor_cycles_completed_total",
                "Total number of completed monitoring cycles"
            )
            .expect("Failed to register cycles_completed"),

            cycles_skipped: register_int_counter!(
                "batch_monitor_cycles_skipped_total",
                "Cycle requests skipped because a cycle was already running"
            )
            .expect("Failed to register cycles_skipped"),

            cycles_aborted: register_int_counter!(
                "batch_monitor_cycles_aborted_total",
                "Cycles aborted because the snapshot source failed"
            )
            .expect("Failed to register cycles_aborted"),

            batch_errors: register_int_counter!(
                "batch_monitor_batch_errors_total",
                "Batches dropped from a cycle after an analysis or persistence error"
            )
            .expect("Failed to register batch_errors"),

            alerts_sent: register_int_counter!(
                "batch_monitor_alerts_sent_total",
                "Total number of stuck alerts delivered"
            )
            .expect("Failed to register alerts_sent"),

            alert_failures: register_int_counter!(
                "batch_monitor_alert_failures_total",
                "Total number of stuck alerts that failed to deliver"
            )
            .expect("Failed to register alert_failures"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn set_cycle_counts(&self, observed: usize, stuck: usize) {
        self.inner().batches_observed.set(observed as i64);
        self.inner().stuck_batches.set(stuck as i64);
    }

    pub fn set_pending_work(&self, pending: i64) {
        self.inner().pending_work.set(pending);
    }

    pub fn inc_cycles_completed(&self) {
        self.inner().cycles_completed.inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn inc_cycles_aborted(&self) {
        self.inner().cycles_aborted.inc();
    }

    pub fn inc_batch_errors(&self) {
        self.inner().batch_errors.inc();
    }

    pub fn inc_alerts_sent(&self) {
        self.inner().alerts_sent.inc();
    }

    pub fn inc_alert_failures(&self) {
        self.inner().alert_failures.inc();
    }
}

/// Structured logger for monitor events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            interval_secs = interval_secs,
            "Batch monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Batch monitor shutting down"
        );
    }

    pub fn log_cycle_completed(
        &self,
        observed: usize,
        stuck: usize,
        alerts_sent: usize,
        failed: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            observed = observed,
            stuck = stuck,
            alerts_sent = alerts_sent,
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Monitoring cycle complete"
        );
    }

    pub fn log_cycle_skipped(&self) {
        info!(
            event = "cycle_skipped",
            instance = %self.instance,
            "Monitoring cycle already running, skipping request"
        );
    }

    pub fn log_cycle_aborted(&self, error: &str) {
        warn!(
            event = "cycle_aborted",
            instance = %self.instance,
            error = %error,
            "Snapshot source failed, cycle aborted"
        );
    }

    pub fn log_batch_stuck(&self, batch_code: &str, reason: &str, records_diff: Option<i64>) {
        warn!(
            event = "batch_stuck",
            instance = %self.instance,
            batch_code = %batch_code,
            reason = %reason,
            records_diff = ?records_diff,
            "Batch classified as stuck"
        );
    }

    pub fn log_batch_failed(&self, batch_code: &str, stage: &str, error: &str) {
        warn!(
            event = "batch_failed",
            instance = %self.instance,
            batch_code = %batch_code,
            stage = %stage,
            error = %error,
            "Batch dropped from cycle"
        );
    }

    pub fn log_alert(&self, batch_code: &str, delivered: bool, detail: &str) {
        if delivered {
            info!(
                event = "alert_dispatched",
                instance = %self.instance,
                batch_code = %batch_code,
                "Stuck alert delivered"
            );
        } else {
            warn!(
                event = "alert_failed",
                instance = %self.instance,
                batch_code = %batch_code,
                error = %detail,
                "Stuck alert not delivered, will be re-evaluated next cycle"
            );
        }
    }
}
