//! Monitor daemon configuration

use anyhow::{Context, Result};
use monitor_lib::detection::DetectionThresholds;
use monitor_lib::history::HistoryLogConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, read from `MONITOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Instance name attached to log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/operations
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Interval between monitoring cycles in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// History window compared against the current snapshot
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,

    /// Maximum history records compared per batch
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Runtime below which a batch is never stuck
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Minimum healthy throughput in records per second
    #[serde(default = "default_min_rps")]
    pub min_rps: f64,

    /// Relative band around mean throughput considered stable
    #[serde(default = "default_trend_band")]
    pub trend_band: f64,

    /// JSON export written by the upstream batch status query
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// JSON-lines history log
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// How long history stays queryable in memory; the file itself is pruned externally
    #[serde(default = "default_history_retention_hours")]
    pub history_retention_hours: u64,

    /// Webhook receiving stuck alerts; alerts are only logged when unset
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "batch-monitor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cycle_interval() -> u64 {
    30 * 60
}

fn default_lookback_minutes() -> u64 {
    60
}

fn default_history_limit() -> usize {
    5
}

fn default_grace_period() -> u64 {
    600
}

fn default_min_rps() -> f64 {
    1.0
}

fn default_trend_band() -> f64 {
    0.2
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/batch-monitor/running_batches.json")
}

fn default_history_path() -> PathBuf {
    PathBuf::from("/var/lib/batch-monitor/history.jsonl")
}

fn default_history_retention_hours() -> u64 {
    7 * 24
}

impl MonitorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR").try_parsing(true))
            .build()
            .context("Failed to read monitor configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be greater than zero");
        }
        if self.history_limit == 0 {
            anyhow::bail!("history_limit must be greater than zero");
        }
        if self.lookback_minutes.checked_mul(60).is_none() {
            anyhow::bail!("lookback_minutes is too large");
        }
        if self.history_retention_hours == 0 {
            anyhow::bail!("history_retention_hours must be greater than zero");
        }
        if self.history_retention_hours.checked_mul(3600).is_none() {
            anyhow::bail!("history_retention_hours is too large");
        }
        if !(0.0..1.0).contains(&self.trend_band) {
            anyhow::bail!("trend_band must be within [0, 1)");
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn history_log(&self) -> HistoryLogConfig {
        HistoryLogConfig {
            persistence_path: Some(self.history_path.clone()),
            retention: Some(Duration::from_secs(
                self.history_retention_hours.saturating_mul(3600),
            )),
        }
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            lookback: Duration::from_secs(self.lookback_minutes.saturating_mul(60)),
            history_limit: self.history_limit,
            grace_period: Duration::from_secs(self.grace_period_secs),
            min_rps: self.min_rps,
            trend_band: self.trend_band,
        }
    }
}
