//! Task persistence
//!
//! The manager loads the whole registry once at startup and writes the
//! whole registry back after every mutation.

use crate::task::Task;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use warden_foundation::{JsonStore, Result};

/// Task document file name inside the data directory
pub const TASKS_FILE: &str = "tasks.json";

/// Storage trait - implement to add new persistence backends
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load every task, in stored order. A missing document is an empty registry.
    async fn load_all(&self) -> Result<Vec<Task>>;

    /// Replace the stored document with `tasks`
    async fn save_all(&self, tasks: &[Task]) -> Result<()>;

    /// Get store name
    fn name(&self) -> &'static str;
}

/// `tasks.json` in the data directory
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    store: JsonStore,
}

impl JsonTaskStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(data_dir),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.store.file_path(TASKS_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        self.store.base_dir()
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn load_all(&self) -> Result<Vec<Task>> {
        Ok(self
            .store
            .load_optional::<Vec<Task>>(TASKS_FILE)?
            .unwrap_or_default())
    }

    async fn save_all(&self, tasks: &[Task]) -> Result<()> {
        self.store.save(TASKS_FILE, tasks)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// In-memory store, for tests and `--no-auto-save` style runs
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    saves: Mutex<usize>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            saves: Mutex::new(0),
        }
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Number of `save_all` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load_all(&self) -> Result<Vec<Task>> {
        Ok(self.snapshot())
    }

    async fn save_all(&self, tasks: &[Task]) -> Result<()> {
        if let Ok(mut stored) = self.tasks.lock() {
            *stored = tasks.to_vec();
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use tempfile::tempdir;
    use warden_foundation::Error;

    #[tokio::test]
    async fn test_json_store_missing_document() {
        let dir = tempdir().unwrap();
        let store = JsonTaskStore::new(dir.path());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_keeps_order_and_timestamps() {
        let dir = tempdir().unwrap();
        let store = JsonTaskStore::new(dir.path());
        let tasks = vec![
            Task::new(NewTask::new("first"), "s"),
            Task::new(NewTask::new("second"), "s"),
        ];

        store.save_all(&tasks).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, tasks);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"createdAt\""));
    }

    #[tokio::test]
    async fn test_json_store_corrupt() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(TASKS_FILE), "[{\"id\": 1").unwrap();
        let store = JsonTaskStore::new(dir.path());
        assert!(matches!(
            store.load_all().await,
            Err(Error::StorageCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryTaskStore::new();
        store.save_all(&[]).await.unwrap();
        store.save_all(&[]).await.unwrap();
        assert_eq!(store.save_count(), 2);
    }
}
