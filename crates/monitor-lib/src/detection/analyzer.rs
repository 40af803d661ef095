//! Stuck-batch and throughput trend detection
//!
//! Compares the current snapshot of a batch with its most recent history
//! records. A batch is stuck when it has been running past the grace period and
//! either its record counter stopped moving or its throughput dropped below the
//! minimum rate.

use crate::history::{HistoryStore, StoreResult};
use crate::models::{
    BatchSnapshot, DetectionStatistics, HistoryRecord, RpsTrend, StuckDetectionResult,
};
use std::time::Duration;

/// Default lookback window for history (60 minutes)
const DEFAULT_LOOKBACK_SECS: u64 = 60 * 60;

/// Default number of history records compared
const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Default grace period before any stuck classification (10 minutes)
const DEFAULT_GRACE_PERIOD_SECS: u64 = 600;

/// Thresholds driving the classification
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionThresholds {
    /// How far back history is considered
    pub lookback: Duration,
    /// Maximum number of history records compared
    pub history_limit: usize,
    /// Batches running this long or less are never stuck
    pub grace_period: Duration,
    /// Throughput below this is considered critically slow
    pub min_rps: f64,
    /// Relative band around the mean rps treated as stable
    pub trend_band: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(DEFAULT_LOOKBACK_SECS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            min_rps: 1.0,
            trend_band: 0.2,
        }
    }
}

/// Classifies batches from their current snapshot and recent history
#[derive(Debug, Clone, Default)]
pub struct TrendAnalyzer {
    thresholds: DetectionThresholds,
}

impl TrendAnalyzer {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Fetch the history window for `current` and classify it
    pub async fn analyze(
        &self,
        store: &dyn HistoryStore,
        current: &BatchSnapshot,
    ) -> StoreResult<StuckDetectionResult> {
        let history = store
            .recent(
                &current.batch_code,
                current.check_time,
                self.thresholds.lookback,
                self.thresholds.history_limit,
            )
            .await?;

        Ok(self.classify(current, &history))
    }

    /// Classify `current` against `history`, ordered newest first
    ///
    /// A batch without history is never stuck, so a cold start cannot raise
    /// an alert on the first observation.
    pub fn classify(
        &self,
        current: &BatchSnapshot,
        history: &[HistoryRecord],
    ) -> StuckDetectionResult {
        let Some(previous) = history.first() else {
            return StuckDetectionResult::no_history();
        };
        let previous = &previous.snapshot;

        let records_increased = current.records_processed > previous.records_processed;
        let low_rps = current.rps < self.thresholds.min_rps;
        let running_too_long = current.duration_seconds > self.thresholds.grace_period.as_secs();

        let reason = if !records_increased && running_too_long {
            Some(format!(
                "Records not increasing: stalled at {} records (previous check {})",
                current.records_processed, previous.records_processed
            ))
        } else if low_rps && running_too_long {
            Some(format!(
                "Low throughput: RPS {:.2} below minimum {:.2}",
                current.rps, self.thresholds.min_rps
            ))
        } else {
            None
        };

        let statistics = DetectionStatistics {
            previous_records: previous.records_processed,
            current_records: current.records_processed,
            records_diff: current.records_processed as i64 - previous.records_processed as i64,
            previous_rps: previous.rps,
            current_rps: current.rps,
            rps_trend: self.trend(current.rps, history),
            checks_analyzed: history.len(),
        };

        StuckDetectionResult {
            is_stuck: reason.is_some(),
            reason,
            statistics: Some(statistics),
        }
    }

    /// Trend of `current_rps` against the mean of history plus itself
    pub fn trend(&self, current_rps: f64, history: &[HistoryRecord]) -> RpsTrend {
        let total: f64 = history.iter().map(|r| r.snapshot.rps).sum::<f64>() + current_rps;
        let mean = total / (history.len() + 1) as f64;

        if current_rps > mean * (1.0 + self.thresholds.trend_band) {
            RpsTrend::Improving
        } else if current_rps < mean * (1.0 - self.thresholds.trend_band) {
            RpsTrend::Degrading
        } else {
            RpsTrend::Stable
        }
    }
}
