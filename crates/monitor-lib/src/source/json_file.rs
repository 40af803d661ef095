//! Snapshot source backed by a JSON export file
//!
//! The upstream status query writes its result set to a file:
//!
//! ```json
//! {
//!   "pending_work": 42,
//!   "batches": [
//!     { "batch_code": "EOD_POSTING", "start_time": "2024-03-01T22:00:00Z",
//!       "business_date": "2024-03-01", "records_processed": 12000,
//!       "duration_seconds": 1200 }
//!   ]
//! }
//! ```

use super::{RawBatchRow, SnapshotSource, SourcePoll};
use crate::models::BatchSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Export document produced by the upstream query job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub pending_work: Option<i64>,
    /// Kept as loose values so one badly typed row cannot fail the export
    #[serde(default)]
    pub batches: Vec<serde_json::Value>,
}

/// Source that reads running batches from a JSON export file
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<ExportDocument> {
        let content = fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Validate loose rows observed at `check_time`, skipping the malformed ones
    pub fn parse_rows(rows: Vec<serde_json::Value>, check_time: DateTime<Utc>) -> Vec<BatchSnapshot> {
        let mut snapshots = Vec::with_capacity(rows.len());

        for (index, value) in rows.into_iter().enumerate() {
            let row: RawBatchRow = match serde_json::from_value(value) {
                Ok(row) => row,
                Err(e) => {
                    warn!(row = index, error = %e, "Skipping unreadable batch row");
                    continue;
                }
            };

            match row.into_snapshot(check_time) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(row = index, error = %e, "Skipping malformed batch row");
                }
            }
        }

        snapshots
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSource {
    async fn list_running_batches(&self) -> Result<Vec<BatchSnapshot>> {
        Ok(self.poll(Utc::now()).await?.batches)
    }

    async fn count_pending_work(&self) -> Result<i64> {
        let document = self.read_document().await?;
        document
            .pending_work
            .ok_or_else(|| anyhow::anyhow!("Export does not report pending work"))
    }

    /// One read of the export answers both questions
    async fn poll(&self, as_of: DateTime<Utc>) -> Result<SourcePoll> {
        let document = self.read_document().await?;
        let total = document.batches.len();
        let batches = Self::parse_rows(document.batches, as_of);

        if document.pending_work.is_none() {
            debug!(path = %self.path.display(), "Export does not report pending work");
        }
        debug!(
            path = %self.path.display(),
            rows = total,
            valid = batches.len(),
            "Read running batches"
        );

        Ok(SourcePoll {
            batches,
            pending_work: document.pending_work,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn write_export(dir: &TempDir, value: serde_json::Value) -> PathBuf {
        let path = dir.path().join("running_batches.json");
        fs::write(&path, serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_valid_rows_and_pending_work() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            json!({
                "pending_work": 17,
                "batches": [
                    {
                        "batch_code": "EOD_POSTING",
                        "start_time": "2024-03-01T22:00:00Z",
                        "business_date": "2024-03-01",
                        "records_processed": 12000,
                        "duration_seconds": 1200
                    }
                ]
            }),
        )
        .await;

        let source = JsonFileSource::new(&path);
        let snapshots = source.list_running_batches().await.unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].batch_code, "EOD_POSTING");
        assert!((snapshots[0].rps - 10.0).abs() < f64::EPSILON);
        assert_eq!(source.count_pending_work().await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            json!({
                "batches": [
                    { "batch_code": "GOOD", "start_time": "2024-03-01T22:00:00Z",
                      "records_processed": 10, "duration_seconds": 5 },
                    { "start_time": "2024-03-01T22:00:00Z", "records_processed": 10 },
                    { "batch_code": "TYPO", "start_time": "2024-03-01T22:00:00Z",
                      "records_processed": "many" },
                    { "batch_code": "NEG", "start_time": "2024-03-01T22:00:00Z",
                      "records_processed": -1, "duration_seconds": 5 }
                ]
            }),
        )
        .await;

        let source = JsonFileSource::new(&path);
        let snapshots = source.list_running_batches().await.unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].batch_code, "GOOD");
        assert!(source.count_pending_work().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = JsonFileSource::new(dir.path().join("absent.json"));

        tokio_test::assert_err!(source.list_running_batches().await);
    }

    #[tokio::test]
    async fn test_poll_reads_one_consistent_document() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            json!({
                "pending_work": 4,
                "batches": [
                    { "batch_code": "EOD_POSTING", "start_time": "2024-03-01T22:00:00Z",
                      "records_processed": 600 }
                ]
            }),
        )
        .await;
        let source = JsonFileSource::new(&path);
        let as_of: DateTime<Utc> = "2024-03-01T22:10:00Z".parse().unwrap();

        let poll = source.poll(as_of).await.unwrap();

        assert_eq!(poll.pending_work, Some(4));
        assert_eq!(poll.batches.len(), 1);
        // Missing duration is measured up to the poll time
        assert_eq!(poll.batches[0].duration_seconds, 600);
        assert_eq!(poll.batches[0].check_time, as_of);
        assert!((poll.batches[0].rps - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_poll_without_pending_work_still_lists_batches() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            json!({
                "batches": [
                    { "batch_code": "GOOD", "start_time": "2024-03-01T22:00:00Z",
                      "records_processed": 10, "duration_seconds": 5 }
                ]
            }),
        )
        .await;

        let poll = JsonFileSource::new(&path).poll(Utc::now()).await.unwrap();

        assert_eq!(poll.batches.len(), 1);
        assert!(poll.pending_work.is_none());
    }
}
