//! Monitoring cycle orchestration
//!
//! This module drives the recurring stuck-detection cycle, guards it against
//! overlap, and publishes a report per cycle.

mod cycle;
mod report;
mod state;


pub use cycle::{CycleConfig, CycleError, MonitoringCycle, MonitoringCycleBuilder};
pub use report::{LogReportSink, ReportSink};
pub use state::{CycleFlag, CycleGuard, CycleState};
