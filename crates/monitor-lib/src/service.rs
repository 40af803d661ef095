//! Facade exposed to API layers built on top of the monitor

use crate::history::{HistoryStore, StoreResult};
use crate::models::{BatchStatisticsSummary, CycleReport, HistoryRecord};
use crate::monitor::{CycleError, MonitoringCycle};
use crate::statistics::StatisticsAggregator;
use std::sync::Arc;
use std::time::Duration;

/// Read and trigger operations over a running monitor
#[derive(Clone)]
pub struct MonitorService {
    cycle: Arc<MonitoringCycle>,
    store: Arc<dyn HistoryStore>,
    statistics: StatisticsAggregator,
}

impl MonitorService {
    pub fn new(cycle: Arc<MonitoringCycle>) -> Self {
        let store = cycle.store();
        Self {
            statistics: StatisticsAggregator::new(Arc::clone(&store)),
            store,
            cycle,
        }
    }

    pub fn cycle(&self) -> &Arc<MonitoringCycle> {
        &self.cycle
    }

    /// Per-batch summaries over the trailing `window`
    pub async fn get_batch_statistics(
        &self,
        batch_code: Option<&str>,
        window: Duration,
    ) -> StoreResult<Vec<BatchStatisticsSummary>> {
        self.statistics.batch_statistics(batch_code, window).await
    }

    /// Latest history records, newest first
    pub async fn get_recent_history(
        &self,
        batch_code: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<HistoryRecord>> {
        self.store.history(batch_code, limit).await
    }

    /// Run a cycle outside the schedule
    pub async fn run_cycle_manually(&self) -> Result<CycleReport, CycleError> {
        self.cycle.run_cycle().await
    }
}
