//! Task registry - the single source of truth for tasks
//!
//! Keeps insertion order (the order of the persisted document) and the
//! attachment table saying which supervisor handle currently belongs to
//! which task.

use crate::supervisor::ProcessHandle;
use crate::task::{Task, TaskId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    attachments: HashMap<TaskId, ProcessHandle>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Build from a loaded document; later duplicates of an id are dropped
    pub(crate) fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut registry = Self::new();
        for task in tasks {
            registry.insert(task);
        }
        registry
    }

    /// Insert if the id is new. Returns false when the id already exists.
    pub(crate) fn insert(&mut self, task: Task) -> bool {
        if self.tasks.contains_key(&task.id) {
            return false;
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        true
    }

    pub(crate) fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Remove a task and any attachment it had
    pub(crate) fn remove(&mut self, id: &TaskId) -> Option<(Task, Option<ProcessHandle>)> {
        let task = self.tasks.remove(id)?;
        self.order.retain(|o| o != id);
        let handle = self.attachments.remove(id);
        Some((task, handle))
    }

    /// Tasks in insertion order
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub(crate) fn snapshot(&self) -> Vec<Task> {
        self.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    // ========== Attachments ==========

    pub(crate) fn attach(&mut self, id: TaskId, handle: ProcessHandle) -> Option<ProcessHandle> {
        self.attachments.insert(id, handle)
    }

    pub(crate) fn detach(&mut self, id: &TaskId) -> Option<ProcessHandle> {
        self.attachments.remove(id)
    }

    pub(crate) fn attached(&self, id: &TaskId) -> Option<ProcessHandle> {
        self.attachments.get(id).copied()
    }

    /// Does `handle` still belong to task `id`?
    pub(crate) fn owns(&self, id: &TaskId, handle: ProcessHandle) -> bool {
        self.attachments.get(id) == Some(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use uuid::Uuid;

    fn handle(pid: u32) -> ProcessHandle {
        ProcessHandle {
            id: Uuid::new_v4(),
            pid,
        }
    }

    #[test]
    fn test_insertion_order_and_duplicates() {
        let a = Task::new(NewTask::new("a"), "s");
        let b = Task::new(NewTask::new("b"), "s");
        let mut dup = a.clone();
        dup.title = "dup".into();

        let registry = Registry::from_tasks(vec![a.clone(), b.clone(), dup]);
        let titles: Vec<&str> = registry.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ownership() {
        let task = Task::new(NewTask::new("a"), "s");
        let id = task.id.clone();
        let mut registry = Registry::from_tasks(vec![task]);

        let first = handle(1);
        let second = handle(2);
        registry.attach(id.clone(), first);
        assert!(registry.owns(&id, first));

        registry.attach(id.clone(), second);
        assert!(!registry.owns(&id, first));
        assert_eq!(registry.detach(&id), Some(second));
        assert!(registry.attached(&id).is_none());
    }

    #[test]
    fn test_remove_drops_attachment() {
        let task = Task::new(NewTask::new("a"), "s");
        let id = task.id.clone();
        let mut registry = Registry::from_tasks(vec![task]);
        let h = handle(7);
        registry.attach(id.clone(), h);

        let (removed, attached) = registry.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(attached, Some(h));
        assert!(!registry.contains(&id));
        assert_eq!(registry.iter().count(), 0);
    }
}
