//! Publication of consolidated cycle reports

use crate::models::CycleReport;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// Reporting boundary for cycle reports
///
/// Publication is fire-and-forget: the orchestrator logs a failure and moves on.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &CycleReport) -> Result<()>;
}

/// Sink that writes cycle reports to the structured log
#[derive(Debug, Clone, Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn publish(&self, report: &CycleReport) -> Result<()> {
        info!(
            event = "cycle_report",
            started_at = %report.started_at,
            observed = report.batches.len(),
            stuck = report.stuck_count(),
            healthy = report.healthy_count(),
            alerts_sent = report.alerts_sent(),
            failed = report.failed_batches.len(),
            pending_work = ?report.pending_work,
            "Batch monitoring report"
        );

        for outcome in &report.batches {
            let trend = outcome
                .detection
                .statistics
                .as_ref()
                .map(|s| s.rps_trend.to_string());
            debug!(
                event = "cycle_report_batch",
                batch_code = %outcome.snapshot.batch_code,
                records_processed = outcome.snapshot.records_processed,
                duration_seconds = outcome.snapshot.duration_seconds,
                rps = outcome.snapshot.rps,
                is_stuck = outcome.detection.is_stuck,
                trend = ?trend,
                alert_sent = outcome.alert_sent,
                "Batch status"
            );
        }

        Ok(())
    }
}
