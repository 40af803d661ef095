//! Read-side statistics over batch history

use crate::history::{HistoryStore, StoreResult};
use crate::models::BatchStatisticsSummary;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Rolls history up into per-batch summaries
///
/// Holds no state of its own, so it can be queried while a cycle is running.
#[derive(Clone)]
pub struct StatisticsAggregator {
    store: Arc<dyn HistoryStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Summaries over the `window` ending now
    pub async fn batch_statistics(
        &self,
        batch_code: Option<&str>,
        window: Duration,
    ) -> StoreResult<Vec<BatchStatisticsSummary>> {
        self.batch_statistics_as_of(batch_code, Utc::now(), window)
            .await
    }

    /// Summaries over the `window` ending at `as_of`
    pub async fn batch_statistics_as_of(
        &self,
        batch_code: Option<&str>,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<Vec<BatchStatisticsSummary>> {
        self.store.summarize(batch_code, as_of, window).await
    }
}
