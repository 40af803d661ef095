//! Alert dispatch for stuck batches
//!
//! Handles:
//! - Building the alert for a stuck classification
//! - Forwarding it to an external [`AlertSink`]
//! - Deduplication per history record `(batch_code, check_time)`
//!
//! Deduplication is per record, not per stuck episode: a batch that stays
//! stuck across three cycles produces three records and three alerts. A failed
//! send is not retried here; the record keeps `alert_sent = false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{BatchSnapshot, DetectionStatistics, StuckDetectionResult};

/// Default retention for dispatched keys (24 hours)
const DEFAULT_DEDUP_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Alert sent for one stuck history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckAlert {
    pub batch_code: String,
    pub check_time: DateTime<Utc>,
    pub business_date: NaiveDate,
    pub reason: String,
    pub records_processed: u64,
    pub duration_seconds: u64,
    pub rps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DetectionStatistics>,
}

impl StuckAlert {
    /// Build the alert for a stuck result; `None` when the batch is healthy
    pub fn from_detection(snapshot: &BatchSnapshot, result: &StuckDetectionResult) -> Option<Self> {
        if !result.is_stuck {
            return None;
        }

        Some(Self {
            batch_code: snapshot.batch_code.clone(),
            check_time: snapshot.check_time,
            business_date: snapshot.business_date,
            reason: result
                .reason
                .clone()
                .unwrap_or_else(|| "Batch classified as stuck".to_string()),
            records_processed: snapshot.records_processed,
            duration_seconds: snapshot.duration_seconds,
            rps: snapshot.rps,
            statistics: result.statistics.clone(),
        })
    }
}

/// External notification collaborator
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. An error means the alert was not delivered.
    async fn send(&self, alert: &StuckAlert) -> anyhow::Result<()>;
}

/// Sink that writes alerts to the log only
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &StuckAlert) -> anyhow::Result<()> {
        warn!(
            event = "batch_stuck_alert",
            batch_code = %alert.batch_code,
            check_time = %alert.check_time,
            reason = %alert.reason,
            records_processed = alert.records_processed,
            rps = alert.rps,
            "Stuck batch alert"
        );
        Ok(())
    }
}

/// Result of a dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Sink accepted the alert
    Sent,
    /// This record was already alerted
    Suppressed,
    /// Result was healthy, nothing to send
    NotStuck,
    /// Sink rejected or failed the delivery
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }
}

/// Key identifying one history record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    batch_code: String,
    check_time: DateTime<Utc>,
}

/// Alert dispatcher with per-record deduplication
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    /// How long dispatched keys are remembered
    retention: Duration,
    /// Dispatched (or in-flight) records -> time of dispatch
    dispatched: Mutex<HashMap<DedupKey, Instant>>,
}

impl AlertDispatcher {
    /// Create a dispatcher with the default 24-hour dedup retention
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            retention: Duration::from_secs(DEFAULT_DEDUP_RETENTION_SECS),
            dispatched: Mutex::new(HashMap::new()),
        }
    }

    /// Set custom dedup retention
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Check whether a record has already been alerted
    pub fn was_dispatched(&self, batch_code: &str, check_time: DateTime<Utc>) -> bool {
        let key = DedupKey {
            batch_code: batch_code.to_string(),
            check_time,
        };
        let dispatched = self.dispatched.lock().unwrap_or_else(|e| e.into_inner());
        dispatched
            .get(&key)
            .map_or(false, |at| at.elapsed() < self.retention)
    }

    /// Forward a stuck finding to the sink at most once per record
    pub async fn notify(
        &self,
        snapshot: &BatchSnapshot,
        result: &StuckDetectionResult,
    ) -> DispatchOutcome {
        let Some(alert) = StuckAlert::from_detection(snapshot, result) else {
            return DispatchOutcome::NotStuck;
        };

        let key = DedupKey {
            batch_code: alert.batch_code.clone(),
            check_time: alert.check_time,
        };

        // Reserve the key before sending so a concurrent notify is suppressed
        {
            let mut dispatched = self.dispatched.lock().unwrap_or_else(|e| e.into_inner());
            dispatched.retain(|_, at| at.elapsed() < self.retention);
            if dispatched.contains_key(&key) {
                return DispatchOutcome::Suppressed;
            }
            dispatched.insert(key.clone(), Instant::now());
        }

        match self.sink.send(&alert).await {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                let mut dispatched = self.dispatched.lock().unwrap_or_else(|e| e.into_inner());
                dispatched.remove(&key);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Drop dedup entries older than the retention window
    pub fn cleanup_dedup_cache(&self) {
        let mut dispatched = self.dispatched.lock().unwrap_or_else(|e| e.into_inner());
        dispatched.retain(|_, at| at.elapsed() < self.retention);
    }

    /// Number of remembered dispatches
    pub fn tracked(&self) -> usize {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RpsTrend;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::sleep;

    struct CountingSink {
        sent: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                sent: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &StuckAlert) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("webhook unreachable");
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stuck_snapshot(check_time: DateTime<Utc>) -> BatchSnapshot {
        BatchSnapshot::new(
            "BATCH_X",
            check_time,
            check_time - chrono::Duration::seconds(900),
            check_time.date_naive(),
            100,
            900,
        )
    }

    fn stuck_result() -> StuckDetectionResult {
        StuckDetectionResult {
            is_stuck: true,
            reason: Some("Records not increasing: stalled at 100 records".to_string()),
            statistics: Some(DetectionStatistics {
                previous_records: 100,
                current_records: 100,
                records_diff: 0,
                previous_rps: 0.2,
                current_rps: 0.11,
                rps_trend: RpsTrend::Degrading,
                checks_analyzed: 1,
            }),
        }
    }

    #[tokio::test]
    async fn test_record_alerted_once() {
        let sink = Arc::new(CountingSink::new());
        let dispatcher = AlertDispatcher::new(sink.clone());
        let snapshot = stuck_snapshot(Utc::now());

        assert_eq!(dispatcher.notify(&snapshot, &stuck_result()).await, DispatchOutcome::Sent);
        assert_eq!(
            dispatcher.notify(&snapshot, &stuck_result()).await,
            DispatchOutcome::Suppressed
        );
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
        assert!(dispatcher.was_dispatched("BATCH_X", snapshot.check_time));
    }

    #[tokio::test]
    async fn test_each_record_of_an_episode_is_alerted() {
        let sink = Arc::new(CountingSink::new());
        let dispatcher = AlertDispatcher::new(sink.clone());
        let now = Utc::now();

        for cycle in 0..3 {
            let snapshot = stuck_snapshot(now + chrono::Duration::minutes(cycle * 30));
            assert!(dispatcher.notify(&snapshot, &stuck_result()).await.is_sent());
        }
        assert_eq!(sink.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_send_can_be_retried() {
        let sink = Arc::new(CountingSink::new());
        sink.fail.store(true, Ordering::SeqCst);
        let dispatcher = AlertDispatcher::new(sink.clone());
        let snapshot = stuck_snapshot(Utc::now());

        let outcome = dispatcher.notify(&snapshot, &stuck_result()).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(ref msg) if msg.contains("unreachable")));
        assert!(!dispatcher.was_dispatched("BATCH_X", snapshot.check_time));

        sink.fail.store(false, Ordering::SeqCst);
        assert!(dispatcher.notify(&snapshot, &stuck_result()).await.is_sent());
    }

    #[tokio::test]
    async fn test_healthy_result_not_sent() {
        let sink = Arc::new(CountingSink::new());
        let dispatcher = AlertDispatcher::new(sink.clone());
        let snapshot = stuck_snapshot(Utc::now());

        let outcome = dispatcher
            .notify(&snapshot, &StuckDetectionResult::no_history())
            .await;
        assert_eq!(outcome, DispatchOutcome::NotStuck);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dedup_cache_expires() {
        let dispatcher = AlertDispatcher::new(Arc::new(LogAlertSink))
            .with_retention(Duration::from_millis(50));
        let snapshot = stuck_snapshot(Utc::now());

        assert!(dispatcher.notify(&snapshot, &stuck_result()).await.is_sent());
        assert_eq!(dispatcher.tracked(), 1);

        sleep(Duration::from_millis(80));
        dispatcher.cleanup_dedup_cache();
        assert_eq!(dispatcher.tracked(), 0);
    }

    #[test]
    fn test_alert_carries_statistics() {
        let snapshot = stuck_snapshot(Utc::now());
        let alert = StuckAlert::from_detection(&snapshot, &stuck_result()).unwrap();

        assert_eq!(alert.batch_code, "BATCH_X");
        assert!(alert.reason.contains("not increasing"));
        assert_eq!(alert.statistics.unwrap().records_diff, 0);
    }
}
