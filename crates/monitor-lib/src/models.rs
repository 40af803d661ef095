//! Core data models for the batch monitor

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single observation of a running batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_code: String,
    pub check_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub business_date: NaiveDate,
    pub records_processed: u64,
    pub duration_seconds: u64,
    /// Derived throughput, records per second
    pub rps: f64,
}

impl BatchSnapshot {
    /// Build a snapshot, deriving `rps` from the record count and duration
    pub fn new(
        batch_code: impl Into<String>,
        check_time: DateTime<Utc>,
        start_time: DateTime<Utc>,
        business_date: NaiveDate,
        records_processed: u64,
        duration_seconds: u64,
    ) -> Self {
        Self {
            batch_code: batch_code.into(),
            check_time,
            start_time,
            business_date,
            records_processed,
            duration_seconds,
            rps: compute_rps(records_processed, duration_seconds),
        }
    }

    /// Re-stamp the snapshot with the time of the cycle that observed it
    pub fn with_check_time(mut self, check_time: DateTime<Utc>) -> Self {
        self.check_time = check_time;
        self
    }
}

/// Records per second, zero when no time has elapsed
pub fn compute_rps(records_processed: u64, duration_seconds: u64) -> f64 {
    if duration_seconds == 0 {
        return 0.0;
    }
    records_processed as f64 / duration_seconds as f64
}

/// A persisted snapshot plus its classification outcome
///
/// Identified by `(batch_code, check_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(flatten)]
    pub snapshot: BatchSnapshot,
    pub is_stuck: bool,
    pub alert_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HistoryRecord {
    /// Build the record for a freshly classified snapshot
    pub fn from_detection(snapshot: BatchSnapshot, result: &StuckDetectionResult) -> Self {
        Self {
            snapshot,
            is_stuck: result.is_stuck,
            alert_sent: false,
            notes: result.reason.clone(),
        }
    }

    pub fn batch_code(&self) -> &str {
        &self.snapshot.batch_code
    }

    pub fn check_time(&self) -> DateTime<Utc> {
        self.snapshot.check_time
    }
}

/// Direction of throughput relative to recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpsTrend {
    Improving,
    Stable,
    Degrading,
}

impl std::fmt::Display for RpsTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpsTrend::Improving => write!(f, "improving"),
            RpsTrend::Stable => write!(f, "stable"),
            RpsTrend::Degrading => write!(f, "degrading"),
        }
    }
}

/// Comparison context between the current snapshot and its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatistics {
    pub previous_records: u64,
    pub current_records: u64,
    /// Signed, a restarted batch can report fewer records than before
    pub records_diff: i64,
    pub previous_rps: f64,
    pub current_rps: f64,
    pub rps_trend: RpsTrend,
    pub checks_analyzed: usize,
}

/// Per-cycle classification of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckDetectionResult {
    pub is_stuck: bool,
    pub reason: Option<String>,
    pub statistics: Option<DetectionStatistics>,
}

impl StuckDetectionResult {
    /// Result for a batch with no usable history
    pub fn no_history() -> Self {
        Self {
            is_stuck: false,
            reason: None,
            statistics: None,
        }
    }
}

/// Aggregate over one batch's history within a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatisticsSummary {
    pub batch_code: String,
    pub total_checks: usize,
    pub avg_rps: f64,
    pub max_rps: f64,
    pub min_rps: f64,
    pub max_records: u64,
    pub stuck_count: usize,
    pub last_check: DateTime<Utc>,
}

/// Outcome of a single batch within a monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub snapshot: BatchSnapshot,
    pub detection: StuckDetectionResult,
    pub alert_sent: bool,
}

/// Consolidated report of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pending work reported by the source, when it could be read
    pub pending_work: Option<i64>,
    pub batches: Vec<BatchOutcome>,
    /// Batches dropped from this cycle after a per-batch failure
    pub failed_batches: Vec<String>,
}

impl CycleReport {
    pub fn stuck_count(&self) -> usize {
        self.batches.iter().filter(|b| b.detection.is_stuck).count()
    }

    pub fn healthy_count(&self) -> usize {
        self.batches.len() - self.stuck_count()
    }

    pub fn alerts_sent(&self) -> usize {
        self.batches.iter().filter(|b| b.alert_sent).count()
    }
}
