use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::FleetError;
use crate::store;
use crate::types::OrchestrationLogEntry;

enum LogMessage {
    Entry(OrchestrationLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Append-only audit trail of orchestration actions (one JSON object per line).
///
/// Appends are queued to a single writer task, so callers never wait on the
/// disk and entries land in the order they were appended. Must be created
/// inside a tokio runtime.
#[derive(Clone)]
pub struct OperationLog {
    path: Arc<PathBuf>,
    sender: mpsc::UnboundedSender<LogMessage>,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = Arc::new(path.into());
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&path), receiver));
        Self { path, sender }
    }

    /// Record an action. Best-effort: a failed write is logged and swallowed.
    pub fn append(&self, action: &str, host: &str, detail: &str) {
        let entry = OrchestrationLogEntry {
            timestamp: now_rfc3339(),
            action: action.to_string(),
            subject_host: host.to_string(),
            detail: detail.to_string(),
        };
        info!(
            action = %entry.action,
            host = %entry.subject_host,
            "{}",
            entry.detail
        );

        if self.sender.send(LogMessage::Entry(entry)).is_err() {
            warn!("Operation log writer for {:?} has stopped", self.path);
        }
    }

    /// Wait until every entry appended so far has been written (or dropped
    /// after a failed write).
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(LogMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// The last `limit` entries, oldest first. Malformed lines are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<OrchestrationLogEntry>, FleetError> {
        self.flush().await;

        let path = Arc::clone(&self.path);
        store::execute_async(move || {
            let text = match std::fs::read_to_string(path.as_ref()) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(FleetError::Storage(format!(
                        "Failed to read {:?}: {}",
                        path, e
                    )))
                }
            };

            let entries: Vec<OrchestrationLogEntry> = text
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();
            let skip = entries.len().saturating_sub(limit);
            Ok(entries.into_iter().skip(skip).collect())
        })
        .await
    }
}

async fn run_writer(path: Arc<PathBuf>, mut receiver: mpsc::UnboundedReceiver<LogMessage>) {
    while let Some(message) = receiver.recv().await {
        match message {
            LogMessage::Entry(entry) => {
                let target = Arc::clone(&path);
                let result = store::execute_async(move || write_entry(&target, &entry)).await;
                if let Err(e) = result {
                    warn!("Failed to append to operation log {:?}: {}", path, e);
                }
            }
            LogMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn write_entry(path: &Path, entry: &OrchestrationLogEntry) -> Result<(), FleetError> {
    let storage_err = |e: std::io::Error| FleetError::Storage(e.to_string());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage_err)?;
    }
    let mut line = serde_json::to_string(entry)
        .map_err(|e| FleetError::Storage(format!("Failed to serialize log entry: {}", e)))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(storage_err)?;
    file.write_all(line.as_bytes()).map_err(storage_err)?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = OperationLog::new(dir.path().join("cluster.log"));

        log.append("node:add", "10.0.0.1", "id=abc");
        log.append("push-config", "10.0.0.1", "site.conf");

        let entries = log.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "node:add");
        assert_eq!(entries[1].subject_host, "10.0.0.1");
        assert_eq!(entries[1].detail, "site.conf");
        assert!(OffsetDateTime::parse(&entries[0].timestamp, &Rfc3339).is_ok());
    }

    #[tokio::test]
    async fn test_recent_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let log = OperationLog::new(dir.path().join("cluster.log"));

        for i in 0..5 {
            log.append("push-config", "h", &format!("{}", i));
        }

        let entries = log.recent(2).await.unwrap();
        let details: Vec<&str> = entries.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_unwritable_log_does_not_fail() {
        let dir = TempDir::new().unwrap();
        // A directory where the log file should be makes every append fail.
        let path = dir.path().join("cluster.log");
        std::fs::create_dir(&path).unwrap();

        let log = OperationLog::new(&path);
        log.append("push-config", "h", "x");
        log.flush().await;
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_append_does_not_wait_for_the_disk() {
        let dir = TempDir::new().unwrap();
        let log = OperationLog::new(dir.path().join("cluster.log"));

        // Appends are queued; a flush makes them visible in order.
        for i in 0..20 {
            log.append("push-config", "h", &i.to_string());
        }
        log.flush().await;

        let text = std::fs::read_to_string(dir.path().join("cluster.log")).unwrap();
        let details: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<OrchestrationLogEntry>(l).unwrap().detail)
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(details, expected);
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = OperationLog::new(dir.path().join("cluster.log"));
        assert!(log.recent(10).await.unwrap().is_empty());
    }
}
