//! Process records, handles and exit events

use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Handle to a process owned by the supervisor
///
/// `id` is the supervisor's own key, distinct from any task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub id: Uuid,
    pub pid: u32,
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pid {})", &self.id.to_string()[..8], self.pid)
    }
}

/// Status of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
        }
    }
}

/// The supervisor's record of a spawned process
///
/// Created on spawn, updated in place when the process exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundProcess {
    pub id: Uuid,
    pub task_id: Option<TaskId>,
    pub process_id: u32,
    pub command: String,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    /// Captured output, only for `OutputSink::Capture`
    pub output: Option<String>,
}

impl BackgroundProcess {
    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            id: self.id,
            pid: self.process_id,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }
}

/// Delivered exactly once per spawned process
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub handle: ProcessHandle,
    pub task_id: Option<TaskId>,
    /// `-1` when the OS reports no code (killed by a signal)
    pub exit_code: i32,
}

impl ExitEvent {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Where a child's stdout and stderr go
#[derive(Debug)]
pub enum OutputSink {
    /// Both streams appended to an already opened file
    File(std::fs::File),
    /// Lines buffered into `BackgroundProcess::output`
    Capture,
    /// Discarded
    Null,
}

/// What to spawn
#[derive(Debug)]
pub struct SpawnRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub sink: OutputSink,
    pub task_id: Option<TaskId>,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            sink: OutputSink::Null,
            task_id: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn sink(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// Summary counts over all records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStatistics {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}
