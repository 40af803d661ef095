//! Aggregation of history records into per-batch summaries

use crate::models::{BatchStatisticsSummary, HistoryRecord};
use std::collections::BTreeMap;

/// Group records by batch code and compute window statistics
///
/// Output is ordered by batch code. Batches without records in the input do
/// not appear.
pub fn summarize_records<'a, I>(records: I) -> Vec<BatchStatisticsSummary>
where
    I: IntoIterator<Item = &'a HistoryRecord>,
{
    let mut groups: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for record in records {
        groups
            .entry(record.batch_code())
            .or_insert_with(Accumulator::default)
            .add(record);
    }

    groups
        .into_iter()
        .filter_map(|(code, acc)| acc.finish(code))
        .collect()
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    rps_sum: f64,
    max_rps: Option<f64>,
    min_rps: Option<f64>,
    max_records: u64,
    stuck_count: usize,
    last_check: Option<chrono::DateTime<chrono::Utc>>,
}

impl Accumulator {
    fn add(&mut self, record: &HistoryRecord) {
        let rps = record.snapshot.rps;
        self.count += 1;
        self.rps_sum += rps;
        self.max_rps = Some(self.max_rps.map_or(rps, |m| m.max(rps)));
        self.min_rps = Some(self.min_rps.map_or(rps, |m| m.min(rps)));
        self.max_records = self.max_records.max(record.snapshot.records_processed);
        if record.is_stuck {
            self.stuck_count += 1;
        }
        let checked = record.check_time();
        self.last_check = Some(self.last_check.map_or(checked, |t| t.max(checked)));
    }

    fn finish(self, batch_code: &str) -> Option<BatchStatisticsSummary> {
        let last_check = self.last_check?;
        Some(BatchStatisticsSummary {
            batch_code: batch_code.to_string(),
            total_checks: self.count,
            avg_rps: self.rps_sum / self.count as f64,
            max_rps: self.max_rps.unwrap_or(0.0),
            min_rps: self.min_rps.unwrap_or(0.0),
            max_records: self.max_records,
            stuck_count: self.stuck_count,
            last_check,
        })
    }
}
