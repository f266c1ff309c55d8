//! Batch and aggregate operations
//!
//! Every id is processed on its own, in input order. A failure is recorded
//! and the next id is processed anyway.

use crate::keyword::parse_keyword;
use crate::manager::TaskManager;
use crate::task::{TaskId, TaskType};
use serde::Serialize;
use std::str::FromStr;
use tracing::{info, warn};
use warden_foundation::{Error, Result};

/// Operation applied by [`TaskManager::batch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Start,
    Stop,
    Restart,
    Remove,
}

impl BatchAction {
    pub const ALL: [BatchAction; 4] = [
        BatchAction::Start,
        BatchAction::Stop,
        BatchAction::Restart,
        BatchAction::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::Start => "start",
            BatchAction::Stop => "stop",
            BatchAction::Restart => "restart",
            BatchAction::Remove => "remove",
        }
    }
}

impl std::fmt::Display for BatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchAction {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_keyword(s, &Self::ALL, Self::as_str, "batch action")
    }
}

/// One id that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub id: TaskId,
    pub reason: String,
}

/// Partition of the input ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn failed_ids(&self) -> Vec<&TaskId> {
        self.failed.iter().map(|f| &f.id).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Narrows `stop_all`; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct StopFilter {
    pub project: Option<String>,
    pub task_type: Option<TaskType>,
}

impl TaskManager {
    /// Apply `action` to each id independently
    pub async fn batch(&self, action: BatchAction, ids: &[TaskId]) -> BatchResult {
        let mut result = BatchResult::default();

        for id in ids {
            let outcome = match action {
                BatchAction::Start => self.start(id).await.map(|_| ()),
                BatchAction::Stop => self.stop(id).await.map(|_| ()),
                BatchAction::Restart => self.restart(id).await.map(|_| ()),
                BatchAction::Remove => self.delete(id).await.map(|_| ()),
            };

            match outcome {
                Ok(()) => result.succeeded.push(id.clone()),
                Err(e) => {
                    warn!("Batch {} failed for {}: {}", action, id, e);
                    result.failed.push(BatchFailure {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch {}: {} succeeded, {} failed",
            action,
            result.succeeded.len(),
            result.failed.len()
        );
        result
    }

    /// Parse `keyword` and run [`TaskManager::batch`]
    pub async fn batch_keyword(&self, keyword: &str, ids: &[TaskId]) -> Result<BatchResult> {
        let action: BatchAction = keyword.parse()?;
        Ok(self.batch(action, ids).await)
    }

    pub async fn batch_start(&self, ids: &[TaskId]) -> BatchResult {
        self.batch(BatchAction::Start, ids).await
    }

    pub async fn batch_stop(&self, ids: &[TaskId]) -> BatchResult {
        self.batch(BatchAction::Stop, ids).await
    }

    pub async fn batch_restart(&self, ids: &[TaskId]) -> BatchResult {
        self.batch(BatchAction::Restart, ids).await
    }

    pub async fn batch_remove(&self, ids: &[TaskId]) -> BatchResult {
        self.batch(BatchAction::Remove, ids).await
    }

    /// Stop every active task matching `filter`. Returns how many were stopped.
    pub async fn stop_all(&self, filter: &StopFilter) -> usize {
        let targets: Vec<TaskId> = self
            .all()
            .await
            .into_iter()
            .filter(|t| t.is_active())
            .filter(|t| match &filter.project {
                Some(project) => t.project.as_deref() == Some(project.as_str()),
                None => true,
            })
            .filter(|t| filter.task_type.map(|ty| t.task_type == ty).unwrap_or(true))
            .map(|t| t.id)
            .collect();

        let mut stopped = 0;
        for id in &targets {
            match self.stop(id).await {
                Ok(_) => stopped += 1,
                Err(e) => warn!("stop_all: failed to stop {}: {}", id, e),
            }
        }

        info!("Stopped {} of {} active tasks", stopped, targets.len());
        stopped
    }

    /// Delete every terminal task. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut registry = self.inner.registry.lock().await;
        let finished: Vec<TaskId> = registry
            .iter()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        for id in &finished {
            registry.remove(id);
        }
        if !finished.is_empty() {
            self.inner.persist(&registry).await;
        }

        info!("Cleaned up {} finished tasks", finished.len());
        finished.len()
    }
}
