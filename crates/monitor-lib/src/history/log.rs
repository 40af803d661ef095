//! History log with optional JSON-lines persistence
//!
//! Records are indexed in memory by batch code for querying. When a
//! persistence path is set the file is append-only:
//! - every record is written as one JSON line and synced before returning
//! - alert flags are appended as `{"alert_sent_for": <id>}` lines and folded
//!   into their record on replay
//! - a torn final line left by an interrupted write is cut off when the log is
//!   opened, and a failed write is truncated back to the last full line
//!
//! Pruning the file itself is left to external housekeeping; the log never
//! rewrites it. An optional retention bounds what is kept in memory.

use super::{
    summarize_records, window_start, HistoryStore, RecordId, StoreError, StoreResult,
};
use crate::models::{BatchStatisticsSummary, HistoryRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for the history log
#[derive(Debug, Clone, Default)]
pub struct HistoryLogConfig {
    /// Path of the JSON-lines file (in-memory only when unset)
    pub persistence_path: Option<PathBuf>,
    /// Records older than this are dropped from memory (kept forever when unset)
    pub retention: Option<Duration>,
}

/// A record with the id it was appended under
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: RecordId,
    #[serde(flatten)]
    record: HistoryRecord,
}

/// One line of the persisted log
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LogLine {
    AlertFlag { alert_sent_for: RecordId },
    Record(StoredRecord),
}

#[derive(Debug)]
struct LogState {
    batches: HashMap<String, Vec<StoredRecord>>,
    next_id: RecordId,
}

impl LogState {
    fn new() -> Self {
        Self {
            batches: HashMap::new(),
            next_id: 1,
        }
    }

    fn len(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    fn find_mut(&mut self, batch_code: &str, check_time: DateTime<Utc>) -> Option<&mut StoredRecord> {
        self.batches
            .get_mut(batch_code)?
            .iter_mut()
            .find(|s| s.record.check_time() == check_time)
    }

    fn insert(&mut self, stored: StoredRecord) {
        self.batches
            .entry(stored.record.batch_code().to_string())
            .or_default()
            .push(stored);
    }

    /// Drop records that fell out of the retention window
    fn prune(&mut self, retention: Duration, as_of: DateTime<Utc>) -> usize {
        let Ok(cutoff) = window_start(as_of, retention) else {
            return 0;
        };

        let before = self.len();
        for records in self.batches.values_mut() {
            records.retain(|s| s.record.check_time() >= cutoff);
        }
        self.batches.retain(|_, records| !records.is_empty());
        before - self.len()
    }
}

/// Newest first, ties broken by append order
fn newest_first(records: &mut [&StoredRecord]) {
    records.sort_by(|a, b| {
        b.record
            .check_time()
            .cmp(&a.record.check_time())
            .then(b.id.cmp(&a.id))
    });
}

/// Append-only history log
pub struct HistoryLog {
    state: RwLock<LogState>,
    config: HistoryLogConfig,
}

impl HistoryLog {
    /// Create an empty in-memory log
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(LogState::new()),
            config: HistoryLogConfig::default(),
        }
    }

    /// Open a log, replaying the persisted file when one exists
    pub async fn open(config: HistoryLogConfig) -> StoreResult<Self> {
        let mut state = LogState::new();

        if let Some(ref path) = config.persistence_path {
            if fs::try_exists(path).await? {
                state = Self::load_from_disk(path).await?;
                info!(
                    path = %path.display(),
                    records = state.len(),
                    "Loaded history log from disk"
                );
            }
        }

        if let Some(retention) = config.retention {
            let pruned = state.prune(retention, Utc::now());
            if pruned > 0 {
                debug!(pruned = pruned, "Dropped expired history records from memory");
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            config,
        })
    }

    /// Convenience for opening a persisted log at `path`
    pub async fn with_persistence(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open(HistoryLogConfig {
            persistence_path: Some(path.into()),
            retention: None,
        })
        .await
    }

    /// Number of records held in memory
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn load_from_disk(path: &Path) -> StoreResult<LogState> {
        let content = fs::read(path).await?;

        // Everything after the last newline is a torn write
        let intact = content
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        if intact < content.len() {
            warn!(
                path = %path.display(),
                discarded_bytes = content.len() - intact,
                "Truncating torn history tail"
            );
            let file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(intact as u64).await?;
            file.sync_data().await?;
        }

        let mut state = LogState::new();
        let mut max_id = 0;
        let mut owners: HashMap<RecordId, String> = HashMap::new();

        for (line_no, line) in content[..intact].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LogLine>(line) {
                Ok(LogLine::Record(stored)) => {
                    max_id = max_id.max(stored.id);
                    owners.insert(stored.id, stored.record.batch_code().to_string());
                    state.insert(stored);
                }
                Ok(LogLine::AlertFlag { alert_sent_for }) => {
                    // Flags for records pruned from the file are dropped
                    let flagged = owners
                        .get(&alert_sent_for)
                        .and_then(|code| state.batches.get_mut(code))
                        .and_then(|records| records.iter_mut().find(|s| s.id == alert_sent_for));
                    if let Some(stored) = flagged {
                        stored.record.alert_sent = true;
                    }
                }
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "Skipping corrupt history line");
                }
            }
        }

        state.next_id = max_id + 1;
        Ok(state)
    }

    /// Append one synced JSON line, cutting the file back if the write fails
    async fn append_line<T: Serialize + Sync>(path: &Path, line: &T) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut bytes = serde_json::to_vec(line)?;
        bytes.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let committed = file.metadata().await?.len();

        if let Err(e) = Self::write_synced(&mut file, &bytes).await {
            if let Err(rollback) = file.set_len(committed).await {
                warn!(
                    path = %path.display(),
                    error = %rollback,
                    "Failed to truncate partial history write"
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn write_synced(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_data().await
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl HistoryStore for HistoryLog {
    async fn append(&self, record: &HistoryRecord) -> StoreResult<RecordId> {
        let mut state = self.state.write().await;

        if state
            .find_mut(record.batch_code(), record.check_time())
            .is_some()
        {
            return Err(StoreError::Duplicate {
                batch_code: record.batch_code().to_string(),
                check_time: record.check_time(),
            });
        }

        let stored = StoredRecord {
            id: state.next_id,
            record: record.clone(),
        };
        // Ids are never reused, even when the write below fails
        state.next_id += 1;

        // Disk first, so a failed write leaves memory untouched
        if let Some(ref path) = self.config.persistence_path {
            Self::append_line(path, &stored).await?;
        }

        let id = stored.id;
        state.insert(stored);

        if let Some(retention) = self.config.retention {
            state.prune(retention, Utc::now());
        }

        Ok(id)
    }

    async fn recent(
        &self,
        batch_code: &str,
        as_of: DateTime<Utc>,
        lookback: Duration,
        limit: usize,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let since = window_start(as_of, lookback)?;
        let state = self.state.read().await;

        let Some(records) = state.batches.get(batch_code) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&StoredRecord> = records
            .iter()
            .filter(|s| s.record.check_time() >= since)
            .collect();
        newest_first(&mut matching);

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn mark_alert_sent(
        &self,
        batch_code: &str,
        check_time: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;

        let Some(stored) = state.find_mut(batch_code, check_time) else {
            return Ok(false);
        };
        if stored.record.alert_sent {
            return Ok(false);
        }

        if let Some(ref path) = self.config.persistence_path {
            let flag = LogLine::AlertFlag {
                alert_sent_for: stored.id,
            };
            Self::append_line(path, &flag).await?;
        }

        stored.record.alert_sent = true;
        Ok(true)
    }

    async fn summarize(
        &self,
        batch_code: Option<&str>,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<Vec<BatchStatisticsSummary>> {
        let since = window_start(as_of, window)?;
        let state = self.state.read().await;

        let in_window = state
            .batches
            .iter()
            .filter(|(code, _)| batch_code.map_or(true, |wanted| code.as_str() == wanted))
            .flat_map(|(_, records)| records.iter())
            .map(|s| &s.record)
            .filter(|r| r.check_time() >= since);

        Ok(summarize_records(in_window))
    }

    async fn history(
        &self,
        batch_code: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<HistoryRecord>> {
        let state = self.state.read().await;

        let mut matching: Vec<&StoredRecord> = match batch_code {
            Some(code) => state.batches.get(code).into_iter().flatten().collect(),
            None => state.batches.values().flatten().collect(),
        };
        newest_first(&mut matching);

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }
}
