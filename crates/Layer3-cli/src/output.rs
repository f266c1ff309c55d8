//! Terminal and JSON rendering

use serde::Serialize;
use serde_json::{json, Value};
use warden_task::{BackgroundProcess, BatchResult, LogTail, Task};

/// Prints either human-readable text or one JSON document per command
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// `{"success": true, ...fields}`
    pub fn success(&self, fields: Value) {
        let mut doc = json!({ "success": true });
        if let (Some(doc), Value::Object(fields)) = (doc.as_object_mut(), fields) {
            doc.extend(fields);
        }
        print_json(&doc);
    }

    pub fn failure(&self, message: &str) {
        if self.json {
            print_json(&json!({ "success": false, "error": message }));
        } else {
            eprintln!("Error: {}", message);
        }
    }

    pub fn task(&self, headline: &str, task: &Task) {
        if self.json {
            self.success(json!({ "task": task }));
        } else {
            println!("{}", headline);
            print_task_details(task);
        }
    }

    pub fn tasks(&self, tasks: &[Task]) {
        if self.json {
            self.success(json!({ "count": tasks.len(), "tasks": tasks }));
            return;
        }

        if tasks.is_empty() {
            println!("No tasks found.");
            return;
        }

        println!(
            "{:<10} {:<3} {:<12} {:<8} {:<18} {:<30}",
            "ID", "", "Status", "Priority", "Type", "Title"
        );
        println!("{}", "-".repeat(86));
        for task in tasks {
            println!(
                "{:<10} {:<3} {:<12} {:<8} {:<18} {:<30}",
                task.id.short(),
                task.status.symbol(),
                task.status.display_name(),
                task.priority.as_str(),
                task.task_type.as_str(),
                truncate(&task.title, 30)
            );
        }
        println!("\nTotal: {}", tasks.len());
    }

    pub fn batch(&self, action: &str, result: &BatchResult) {
        if self.json {
            self.success(json!({ "action": action, "result": result }));
            return;
        }

        println!(
            "Batch {}: {} succeeded, {} failed",
            action,
            result.succeeded.len(),
            result.failed.len()
        );
        for id in &result.succeeded {
            println!("  ✓ {}", id);
        }
        for failure in &result.failed {
            println!("  ✗ {}: {}", failure.id, failure.reason);
        }
    }

    pub fn count(&self, message: &str, key: &str, count: usize) {
        if self.json {
            self.success(json!({ key: count }));
        } else {
            println!("{}: {}", message, count);
        }
    }

    pub fn lines(&self, key: &str, lines: &[String], empty: &str) {
        if self.json {
            self.success(json!({ key: lines }));
        } else if lines.is_empty() {
            println!("{}", empty);
        } else {
            for line in lines {
                println!("{}", line);
            }
        }
    }

    pub fn log_tail(&self, task: &Task, tail: &LogTail) {
        if self.json {
            self.success(json!({ "taskId": task.id, "logFile": task.log_file, "logs": tail }));
        } else {
            println!("{}", tail);
        }
    }

    pub fn processes(&self, processes: &[BackgroundProcess], tasks: &[Task]) {
        if self.json {
            self.success(json!({ "processes": processes, "tasks": tasks }));
            return;
        }

        if processes.is_empty() && tasks.is_empty() {
            println!("No background processes found");
            return;
        }

        for process in processes {
            println!("[{}] PID: {}", &process.id.to_string()[..8], process.process_id);
            println!("  Status: {}", process.status.as_str());
            println!("  Command: {}", process.command);
            println!("  Started: {}", process.started_at.to_rfc3339());
            if let Some(code) = process.exit_code {
                println!("  Exit Code: {}", code);
            }
            println!();
        }

        for task in tasks {
            println!(
                "[{}] PID: {}",
                task.id.short(),
                task.process_id
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("  Status: {}", task.status.display_name());
            println!("  Command: {}", task.command.as_deref().unwrap_or("-"));
            println!("  Title: {}", task.title);
            if let Some(code) = task.exit_code {
                println!("  Exit Code: {}", code);
            }
            println!();
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render JSON: {}", e),
    }
}

fn print_task_details(task: &Task) {
    println!("  ID:          {}", task.id);
    println!("  Title:       {}", task.title);
    if let Some(description) = &task.description {
        println!("  Description: {}", description);
    }
    println!(
        "  Status:      {} {}",
        task.status.symbol(),
        task.status.display_name()
    );
    println!("  Priority:    {}", task.priority);
    println!("  Type:        {}", task.task_type);
    if !task.tags.is_empty() {
        println!("  Tags:        {}", task.tags.join(", "));
    }
    if let Some(command) = &task.command {
        println!("  Command:     {}", command);
    }
    if let Some(cwd) = &task.cwd {
        println!("  Cwd:         {}", cwd.display());
    }
    if let Some(pid) = task.process_id {
        println!("  PID:         {}", pid);
    }
    if let Some(code) = task.exit_code {
        println!("  Exit Code:   {}", code);
    }
    if let Some(log_file) = &task.log_file {
        println!("  Log File:    {}", log_file.display());
    }
    if !task.conflicts.is_empty() {
        println!("  Conflicts:   {}", join_ids(&task.conflicts));
    }
    if !task.dependencies.is_empty() {
        println!("  Depends On:  {}", join_ids(&task.dependencies));
    }
    if let Some(project) = &task.project {
        println!("  Project:     {}", project);
    }
    if let Some(session) = &task.session_id {
        println!("  Session:     {}", session);
    }
    println!("  Created:     {}", task.created_at.to_rfc3339());
    println!("  Updated:     {}", task.updated_at.to_rfc3339());
    if let Some(completed) = task.completed_at {
        println!("  Completed:   {}", completed.to_rfc3339());
    }
}

fn join_ids(ids: &[warden_task::TaskId]) -> String {
    ids.iter()
        .map(|id| id.short().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Truncate a string for display
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long task title", 10), "a long ...");
        assert_eq!(truncate("빌드 서버 재시작 작업", 5), "빌드...");
    }
}
