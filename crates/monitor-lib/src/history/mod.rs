//! Append-only history of batch snapshots
//!
//! This module provides:
//! - The [`HistoryStore`] contract used by the analyzer and orchestrator
//! - [`HistoryLog`], an in-memory log with optional JSON-lines persistence
//! - Window aggregation into [`BatchStatisticsSummary`] rows

mod log;
mod summary;

pub use self::log::{HistoryLog, HistoryLogConfig};
pub use summary::summarize_records;

use crate::models::{BatchStatisticsSummary, HistoryRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Identifier assigned to a record when it is appended
pub type RecordId = u64;

/// Errors raised by history storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history record for {batch_code} at {check_time} already exists")]
    Duplicate {
        batch_code: String,
        check_time: DateTime<Utc>,
    },

    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("window of {0:?} is out of range")]
    InvalidWindow(Duration),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage contract for batch history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Durably append a record. Never overwrites an existing
    /// `(batch_code, check_time)` row.
    async fn append(&self, record: &HistoryRecord) -> StoreResult<RecordId>;

    /// Records for `batch_code` checked within `lookback` of `as_of`,
    /// newest first, at most `limit`
    async fn recent(
        &self,
        batch_code: &str,
        as_of: DateTime<Utc>,
        lookback: Duration,
        limit: usize,
    ) -> StoreResult<Vec<HistoryRecord>>;

    /// Flag the exactly matching record as alerted.
    ///
    /// Returns `true` only when the flag flipped on this call.
    async fn mark_alert_sent(
        &self,
        batch_code: &str,
        check_time: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Per-batch aggregates over `window` ending at `as_of`
    async fn summarize(
        &self,
        batch_code: Option<&str>,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<Vec<BatchStatisticsSummary>>;

    /// Latest records across the log, newest first
    async fn history(&self, batch_code: Option<&str>, limit: usize)
        -> StoreResult<Vec<HistoryRecord>>;
}

/// Convert a std window into the earliest check time it admits
pub(crate) fn window_start(as_of: DateTime<Utc>, window: Duration) -> StoreResult<DateTime<Utc>> {
    let window_chrono =
        chrono::Duration::from_std(window).map_err(|_| StoreError::InvalidWindow(window))?;
    as_of
        .checked_sub_signed(window_chrono)
        .ok_or(StoreError::InvalidWindow(window))
}
