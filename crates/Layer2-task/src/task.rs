//! Task definition and types

use crate::keyword::parse_keyword;
use crate::state::TaskStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;
use warden_foundation::Error;

/// Unique identifier for a task
///
/// Opaque text. Fresh ids are UUID v4, imported ids are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for tables
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task priority (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(s, &Self::ALL, Self::as_str, "priority")
    }
}

/// Task classification
///
/// Only the advisory suggestions and the filters look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Task,
    BackgroundProcess,
    Build,
    Serve,
    Watch,
    Test,
    Custom,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Task,
        TaskType::BackgroundProcess,
        TaskType::Build,
        TaskType::Serve,
        TaskType::Watch,
        TaskType::Test,
        TaskType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::BackgroundProcess => "background_process",
            TaskType::Build => "build",
            TaskType::Serve => "serve",
            TaskType::Watch => "watch",
            TaskType::Test => "test",
            TaskType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(s, &Self::ALL, Self::as_str, "type")
    }
}

/// A tracked unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: TaskStatus,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(rename = "type", default)]
    pub task_type: TaskType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Shell command; its presence makes `start` spawn a process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// OS pid of the current or most recent process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Append-only output file, assigned on first start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Tasks that must not run at the same time as this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<TaskId>,

    /// Tasks that must be running before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Session this task was created in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Task {
    /// Create a pending task from a draft
    pub fn new(draft: NewTask, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            title: draft.title,
            description: draft.description,
            status: TaskStatus::Pending,
            priority: draft.priority,
            task_type: draft.task_type,
            tags: draft.tags,
            command: draft.command,
            cwd: draft.cwd,
            process_id: None,
            exit_code: None,
            log_file: None,
            conflicts: draft.conflicts,
            dependencies: draft.dependencies,
            project: draft.project,
            session_id: Some(session_id.into()),
            created_at: now,
            updated_at: now,
            completed_at: None,
            metadata: draft.metadata,
        }
    }

    /// Bump `updated_at`, strictly increasing even within one clock tick
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    /// Set status and bump `updated_at`; entering `Completed` stamps `completed_at`
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status == TaskStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn has_command(&self) -> bool {
        self.command
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    /// Check if task is still active (running or in progress)
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Any of `tags` present on the task
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Fields for a new task
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub task_type: TaskType,
    pub tags: Vec<String>,
    pub command: Option<String>,
    pub cwd: Option<PathBuf>,
    pub project: Option<String>,
    pub conflicts: Vec<TaskId>,
    pub dependencies: Vec<TaskId>,
    pub metadata: Option<serde_json::Value>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn conflicts<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.conflicts = ids.into_iter().collect();
        self
    }

    pub fn dependencies<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.dependencies = ids.into_iter().collect();
        self
    }
}

/// Partial update; `None` leaves a field untouched
///
/// `id` and `created_at` are not part of it and so can never change.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<TaskType>,
    pub tags: Option<Vec<String>>,
    pub command: Option<String>,
    pub cwd: Option<PathBuf>,
    pub project: Option<String>,
    pub conflicts: Option<Vec<TaskId>>,
    pub dependencies: Option<Vec<TaskId>>,
    pub metadata: Option<serde_json::Value>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn conflicts(mut self, ids: Vec<TaskId>) -> Self {
        self.conflicts = Some(ids);
        self
    }

    pub fn dependencies(mut self, ids: Vec<TaskId>) -> Self {
        self.dependencies = Some(ids);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.task_type.is_none()
            && self.tags.is_none()
            && self.command.is_none()
            && self.cwd.is_none()
            && self.project.is_none()
            && self.conflicts.is_none()
            && self.dependencies.is_none()
            && self.metadata.is_none()
    }

    /// Apply every provided field to `task`
    pub(crate) fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = Some(description);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        if let Some(command) = self.command {
            task.command = Some(command);
        }
        if let Some(cwd) = self.cwd {
            task.cwd = Some(cwd);
        }
        if let Some(project) = self.project {
            task.project = Some(project);
        }
        if let Some(conflicts) = self.conflicts {
            task.conflicts = conflicts;
        }
        if let Some(dependencies) = self.dependencies {
            task.dependencies = dependencies;
        }
        if let Some(metadata) = self.metadata {
            task.metadata = Some(metadata);
        }
        match self.status {
            Some(status) => task.set_status(status),
            None => task.touch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new(NewTask::new("build").command("cargo build"), "s1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.session_id.as_deref(), Some("s1"));
        assert!(task.has_command());
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut task = Task::new(NewTask::new("t"), "s1");
        let mut last = task.updated_at;
        for _ in 0..100 {
            task.touch();
            assert!(task.updated_at > last);
            last = task.updated_at;
        }
    }

    #[test]
    fn test_update_keeps_identity() {
        let mut task = Task::new(NewTask::new("before"), "s1");
        let (id, created) = (task.id.clone(), task.created_at);

        TaskUpdate::new()
            .title("after")
            .status(TaskStatus::Completed)
            .apply(&mut task);

        assert_eq!(task.id, id);
        assert_eq!(task.created_at, created);
        assert_eq!(task.title, "after");
        assert!(task.completed_at.is_some());
        assert!(task.updated_at > created);
    }

    #[test]
    fn test_json_shape() {
        let mut task = Task::new(
            NewTask::new("serve")
                .task_type(TaskType::BackgroundProcess)
                .conflicts(vec![TaskId::from("other")]),
            "s1",
        );
        task.process_id = Some(42);

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "background_process");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["processId"], 42);
        assert_eq!(value["conflicts"][0], "other");
        assert!(value.get("createdAt").unwrap().is_string());
        assert!(value.get("command").is_none());

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_short_id() {
        let id = TaskId::from("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(TaskId::from("abc").short(), "abc");
    }
}
