//! Task queries

use crate::manager::{task_not_found, TaskManager};
use crate::state::TaskStatus;
use crate::task::{Task, TaskId, TaskPriority, TaskType};
use regex::RegexBuilder;
use warden_foundation::{Error, Result};

/// Every provided field must match
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub task_type: Option<TaskType>,
    /// Matches when the task has at least one of these
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub session_id: Option<String>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
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

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map(|s| task.status == s).unwrap_or(true)
            && self.priority.map(|p| task.priority == p).unwrap_or(true)
            && self.task_type.map(|t| task.task_type == t).unwrap_or(true)
            && (self.tags.is_empty() || task.has_any_tag(&self.tags))
            && self
                .project
                .as_deref()
                .map(|p| task.project.as_deref() == Some(p))
                .unwrap_or(true)
            && self
                .session_id
                .as_deref()
                .map(|s| task.session_id.as_deref() == Some(s))
                .unwrap_or(true)
    }
}

impl TaskManager {
    /// Matching tasks, most recently updated first
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .registry
            .lock()
            .await
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks
    }

    /// First task, in registry order, whose `process_id` is `pid`
    pub async fn find_by_pid(&self, pid: u32) -> Option<Task> {
        self.inner
            .registry
            .lock()
            .await
            .iter()
            .find(|t| t.process_id == Some(pid))
            .cloned()
    }

    /// Tasks whose command matches `pattern`, case-insensitively
    pub async fn find_by_command(&self, pattern: &str) -> Result<Vec<Task>> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("invalid pattern '{}': {}", pattern, e)))?;

        Ok(self
            .inner
            .registry
            .lock()
            .await
            .iter()
            .filter(|t| t.command.as_deref().map(|c| regex.is_match(c)).unwrap_or(false))
            .cloned()
            .collect())
    }

    /// Resolve a full id or a unique id prefix
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Task> {
        let registry = self.inner.registry.lock().await;
        if let Some(task) = registry.get(&TaskId::from(prefix)) {
            return Ok(task.clone());
        }
        if prefix.is_empty() {
            return Err(Error::InvalidInput("empty task id".into()));
        }

        let mut matches = registry.iter().filter(|t| t.id.as_str().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.clone()),
            (Some(_), Some(_)) => Err(Error::InvalidInput(format!(
                "task id prefix '{}' is ambiguous",
                prefix
            ))),
            (None, _) => Err(task_not_found(&TaskId::from(prefix))),
        }
    }

    pub async fn list_background_tasks(&self) -> Vec<Task> {
        self.list_tasks(&TaskFilter::new().task_type(TaskType::BackgroundProcess))
            .await
    }
}
