//! Snapshot sources for running batches
//!
//! The monitor pulls the set of currently running batches from an external
//! execution system. Rows coming from that system are loosely shaped, so they
//! are validated into [`BatchSnapshot`]s at this boundary and malformed rows are
//! skipped before they reach the analyzer.

mod json_file;
mod row;

pub use json_file::{ExportDocument, JsonFileSource};
pub use row::{RawBatchRow, SnapshotError};

use crate::models::BatchSnapshot;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

pub use async_trait::async_trait;

/// Everything a cycle reads from the source
#[derive(Debug, Clone, Default)]
pub struct SourcePoll {
    pub batches: Vec<BatchSnapshot>,
    /// `None` when the source could not report pending work
    pub pending_work: Option<i64>,
}

/// Trait for snapshot source implementations
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// List all batches that are currently running
    async fn list_running_batches(&self) -> Result<Vec<BatchSnapshot>>;

    /// Count work items still waiting to be picked up
    async fn count_pending_work(&self) -> Result<i64>;

    /// Read running batches and pending work as observed at `as_of`
    ///
    /// Only a failure to list batches is an error. The default makes two
    /// calls; sources that can answer both from one read override it so a
    /// cycle sees a single consistent view.
    async fn poll(&self, _as_of: DateTime<Utc>) -> Result<SourcePoll> {
        let batches = self.list_running_batches().await?;
        let pending_work = match self.count_pending_work().await {
            Ok(pending) => Some(pending),
            Err(e) => {
                debug!(error = %e, "Pending work count unavailable");
                None
            }
        };

        Ok(SourcePoll {
            batches,
            pending_work,
        })
    }
}
