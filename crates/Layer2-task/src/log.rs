//! Task log files
//!
//! Each command task appends stdout and stderr to one file. Reads never shell
//! out and tolerate a partially written last line.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tracing::debug;
use warden_foundation::{Error, Result};

/// Logs directory inside the data directory
pub const LOGS_DIR: &str = "logs";

/// Default number of lines for a tail read
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Result of a tail read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "lines", rename_all = "snake_case")]
pub enum LogTail {
    Lines(Vec<String>),
    /// The log file does not exist
    NoLogs,
}

impl LogTail {
    pub fn is_empty(&self) -> bool {
        match self {
            LogTail::Lines(lines) => lines.is_empty(),
            LogTail::NoLogs => true,
        }
    }
}

impl std::fmt::Display for LogTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogTail::Lines(lines) => f.write_str(&lines.join("\n")),
            LogTail::NoLogs => f.write_str("No logs available"),
        }
    }
}

/// `<logs_dir>/<task_id>.log`
pub fn default_log_path(logs_dir: &Path, task_id: &str) -> PathBuf {
    logs_dir.join(format!("{}.log", task_id))
}

/// Open (creating) `path` for appending, bounded by `timeout`
pub async fn open_append(path: &Path, timeout: Duration) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    let open = options.open(path);
    let file = tokio::time::timeout(timeout, open)
        .await
        .map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!(
                    "opening log file {} timed out after {:.1}s",
                    path.display(),
                    timeout.as_secs_f64()
                ),
            ))
        })??;

    debug!("Opened log file {}", path.display());
    Ok(file.into_std().await)
}

/// Last `lines` lines of `path`
pub async fn read_tail(path: &Path, lines: usize) -> Result<LogTail> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LogTail::NoLogs),
        Err(e) => return Err(e.into()),
    };

    let content = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(LogTail::Lines(
        all[start..].iter().map(|l| l.to_string()).collect(),
    ))
}
