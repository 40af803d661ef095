//! Validation of raw batch status rows

use crate::models::BatchSnapshot;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a raw row
#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },

    #[error("batch code is empty")]
    EmptyBatchCode,
}

/// Batch status row as reported by the upstream query
///
/// Every field is optional so that a single bad row does not fail the whole
/// export. `duration_seconds` falls back to the time elapsed since
/// `start_time` when the source leaves it out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBatchRow {
    #[serde(default)]
    pub batch_code: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub business_date: Option<NaiveDate>,
    #[serde(default)]
    pub records_processed: Option<i64>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

impl RawBatchRow {
    /// Validate the row into a snapshot observed at `check_time`
    pub fn into_snapshot(self, check_time: DateTime<Utc>) -> Result<BatchSnapshot, SnapshotError> {
        let batch_code = self
            .batch_code
            .map(|code| code.trim().to_string())
            .ok_or(SnapshotError::MissingField("batch_code"))?;
        if batch_code.is_empty() {
            return Err(SnapshotError::EmptyBatchCode);
        }

        let start_time = self
            .start_time
            .ok_or(SnapshotError::MissingField("start_time"))?;
        let business_date = self.business_date.unwrap_or_else(|| start_time.date_naive());

        let records = self
            .records_processed
            .ok_or(SnapshotError::MissingField("records_processed"))?;
        let records = non_negative("records_processed", records)?;

        let duration = match self.duration_seconds {
            Some(value) => non_negative("duration_seconds", value)?,
            None => (check_time - start_time).num_seconds().max(0) as u64,
        };

        Ok(BatchSnapshot::new(
            batch_code,
            check_time,
            start_time,
            business_date,
            records,
            duration,
        ))
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u64, SnapshotError> {
    u64::try_from(value).map_err(|_| SnapshotError::Negative { field, value })
}
