//! Stuck detection for running batches
//!
//! This module provides:
//! - Classification of a snapshot against its recent history
//! - Throughput trend with a hysteresis band
//! - Alert dispatch with per-record deduplication

mod alerter;
mod analyzer;

pub use alerter::{AlertDispatcher, AlertSink, DispatchOutcome, LogAlertSink, StuckAlert};
pub use analyzer::{DetectionThresholds, TrendAnalyzer};
