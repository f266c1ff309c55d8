//! Advisory hints for a command about to be run
//!
//! Purely informational. Nothing here changes task state.

use crate::manager::TaskManager;
use crate::query::TaskFilter;
use crate::state::TaskStatus;
use crate::task::{Task, TaskType};

const BUILD_WORDS: &[&str] = &["build", "compile"];
const SERVE_WORDS: &[&str] = &["serve", "dev", "start"];

/// Hints for `command` given the currently running tasks
pub fn suggest_actions(command: &str, running: &[Task]) -> Vec<String> {
    let command = command.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| command.contains(*w));
    let ids_of = |task_type: TaskType| {
        running
            .iter()
            .filter(|t| t.status == TaskStatus::Running && t.task_type == task_type)
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
    };

    let mut suggestions = Vec::new();

    if mentions(BUILD_WORDS) {
        let servers = ids_of(TaskType::Serve);
        if !servers.is_empty() {
            suggestions.push(format!(
                "Suggestion: Stop running servers before build: {}",
                servers.join(", ")
            ));
        }
    }

    if mentions(SERVE_WORDS) {
        let builds = ids_of(TaskType::Build);
        if !builds.is_empty() {
            suggestions.push(format!(
                "Warning: Build tasks are running: {}",
                builds.join(", ")
            ));
        }
    }

    suggestions
}

impl TaskManager {
    /// [`suggest_actions`] over the current snapshot of running tasks
    pub async fn suggest_actions(&self, command: &str) -> Vec<String> {
        let running = self
            .list_tasks(&TaskFilter::new().status(TaskStatus::Running))
            .await;
        suggest_actions(command, &running)
    }
}
