//! Command handlers

use crate::output::Output;
use crate::Command;
use anyhow::Context;
use serde_json::json;
use std::time::Duration;
use warden_foundation::Error;
use warden_task::{
    BatchAction, NewTask, ProcessStatus, StopFilter, Task, TaskFilter, TaskId, TaskManager,
    TaskUpdate,
};

/// Slice of time `follow` waits before checking again
const FOLLOW_SLICE: Duration = Duration::from_secs(60);

pub async fn run(manager: &TaskManager, command: Command, out: Output) -> anyhow::Result<()> {
    match command {
        Command::Create {
            title,
            description,
            priority,
            tags,
            task_type,
            command,
            cwd,
            project,
            conflicts,
            depends_on,
        } => {
            let mut draft = NewTask::new(title)
                .priority(priority)
                .task_type(task_type)
                .tags(tags)
                .conflicts(resolve_all(manager, &conflicts).await?)
                .dependencies(resolve_all(manager, &depends_on).await?);
            if let Some(description) = description {
                draft = draft.description(description);
            }
            if let Some(command) = command {
                draft = draft.command(command);
            }
            if let Some(cwd) = cwd {
                draft = draft.cwd(cwd);
            }
            if let Some(project) = project {
                draft = draft.project(project);
            }

            let task = manager.create(draft).await?;
            out.task("Task created", &task);
        }

        Command::List {
            status,
            priority,
            task_type,
            tags,
            project,
            session,
        } => {
            let filter = TaskFilter {
                status,
                priority,
                task_type,
                tags,
                project,
                session_id: if session {
                    Some(manager.session_id().await)
                } else {
                    None
                },
            };
            out.tasks(&manager.list_tasks(&filter).await);
        }

        Command::Show { id } => {
            let task = manager.find_by_prefix(&id).await?;
            out.task("Task", &task);
        }

        Command::Update {
            id,
            title,
            description,
            status,
            priority,
            command,
            project,
        } => {
            let id = resolve(manager, &id).await?;
            let update = TaskUpdate {
                title,
                description,
                status,
                priority,
                command,
                project,
                ..Default::default()
            };
            if update.is_empty() {
                anyhow::bail!("nothing to update");
            }
            let task = manager.update(&id, update).await?;
            out.task("Task updated", &task);
        }

        Command::Complete { id } => {
            let id = resolve(manager, &id).await?;
            let task = manager.complete(&id).await?;
            out.task("Task completed", &task);
        }

        Command::Delete { id } => {
            let id = resolve(manager, &id).await?;
            let task = manager.delete(&id).await?;
            out.task("Task deleted", &task);
        }

        Command::Start { id, wait } => {
            let id = resolve(manager, &id).await?;
            let task = manager.start(&id).await?;
            finish_start(manager, task, wait, out).await?;
        }

        Command::Stop { id } => {
            let id = resolve(manager, &id).await?;
            let task = manager.stop(&id).await?;
            out.task("Task stopped", &task);
        }

        Command::Restart { id, wait } => {
            let id = resolve(manager, &id).await?;
            let task = manager.restart(&id).await?;
            finish_start(manager, task, wait, out).await?;
        }

        Command::StopAll { project, task_type } => {
            let stopped = manager
                .stop_all(&StopFilter { project, task_type })
                .await;
            out.count("Tasks stopped", "stopped", stopped);
        }

        Command::Cleanup => {
            let removed = manager.cleanup().await;
            out.count("Finished tasks removed", "removed", removed);
        }

        Command::Batch { action, ids } => {
            let action: BatchAction = action.parse()?;
            // Unresolvable prefixes are passed through and fail as NotFound
            let mut resolved = Vec::with_capacity(ids.len());
            for id in &ids {
                resolved.push(
                    manager
                        .find_by_prefix(id)
                        .await
                        .map(|t| t.id)
                        .unwrap_or_else(|_| TaskId::from(id.as_str())),
                );
            }
            let result = manager.batch(action, &resolved).await;
            out.batch(action.as_str(), &result);
        }

        Command::Find { pid, command } => {
            let tasks = match (pid, command) {
                (Some(pid), _) => manager.find_by_pid(pid).await.into_iter().collect(),
                (None, Some(pattern)) => manager.find_by_command(&pattern).await?,
                (None, None) => Vec::new(),
            };
            out.tasks(&tasks);
        }

        Command::Logs { id, lines } => {
            let task = manager.find_by_prefix(&id).await?;
            let tail = manager.read_log_tail(&task.id, lines).await?;
            out.log_tail(&task, &tail);
        }

        Command::Suggest { command } => {
            let hints = manager.suggest_actions(&command).await;
            out.lines("suggestions", &hints, "No suggestions.");
        }

        Command::Session { new } => {
            let session = if new {
                manager.start_session().await
            } else {
                manager.session_id().await
            };
            if out.json {
                out.success(json!({ "sessionId": session }));
            } else {
                println!("Current session: {}", session);
            }
        }

        Command::Export { file } => {
            let count = manager
                .export_all(&file)
                .await
                .with_context(|| format!("exporting to {}", file.display()))?;
            out.count(&format!("Exported to {}", file.display()), "exported", count);
        }

        Command::Import { file } => {
            let count = manager
                .import_all(&file)
                .await
                .with_context(|| format!("importing from {}", file.display()))?;
            out.count(&format!("Imported from {}", file.display()), "imported", count);
        }

        Command::Bashes { running } => {
            let status = running.then_some(ProcessStatus::Running);
            let processes = manager.supervisor().list_processes(status).await;
            let mut tasks = manager.list_background_tasks().await;
            if running {
                tasks.retain(Task::is_active);
            }
            out.processes(&processes, &tasks);
        }

        Command::BgCreate {
            title,
            command,
            description,
            priority,
            tags,
            wait,
        } => {
            let mut draft = NewTask::new(title)
                .command(command)
                .priority(priority)
                .tags(tags);
            if let Some(description) = description {
                draft = draft.description(description);
            }
            let task = manager.create_background_task(draft).await?;
            finish_start(manager, task, wait, out).await?;
        }

        Command::BgKill { id } => {
            let id = resolve_background(manager, &id).await?;
            let task = manager.kill_background_task(&id).await?;
            out.task("Background process killed", &task);
        }

        Command::BgLogs { id, lines } => {
            let id = resolve_background(manager, &id).await?;
            let task = manager.find_by_prefix(id.as_str()).await?;
            let tail = manager.read_log_tail(&id, lines).await?;
            out.log_tail(&task, &tail);
        }
    }

    Ok(())
}

async fn resolve(manager: &TaskManager, id: &str) -> anyhow::Result<TaskId> {
    Ok(manager.find_by_prefix(id).await?.id)
}

async fn resolve_all(manager: &TaskManager, ids: &[String]) -> anyhow::Result<Vec<TaskId>> {
    let mut resolved = Vec::with_capacity(ids.len());
    for id in ids.iter().filter(|id| !id.trim().is_empty()) {
        resolved.push(resolve(manager, id.trim()).await?);
    }
    Ok(resolved)
}

/// A task id or prefix, or the pid of a background task
async fn resolve_background(manager: &TaskManager, id: &str) -> anyhow::Result<TaskId> {
    match manager.find_by_prefix(id).await {
        Ok(task) => Ok(task.id),
        Err(Error::NotFound(_)) => {
            let by_pid = match id.parse::<u32>() {
                Ok(pid) => manager.find_by_pid(pid).await,
                Err(_) => None,
            };
            by_pid
                .map(|t| t.id)
                .ok_or_else(|| Error::not_found(format!("background task {}", id)).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the started task and optionally stay with it until it finishes
async fn finish_start(
    manager: &TaskManager,
    task: Task,
    wait: bool,
    out: Output,
) -> anyhow::Result<()> {
    if !wait || !manager.is_attached(&task.id).await {
        if !out.json && task.process_id.is_some() {
            println!("Process keeps running after warden exits; use `warden stop` to cancel it.");
        }
        out.task("Task started", &task);
        return Ok(());
    }

    if !out.json {
        println!(
            "Task {} running as pid {}, waiting (Ctrl-C to stop)...",
            task.id.short(),
            task.process_id.unwrap_or_default()
        );
    }
    let finished = follow(manager, &task.id).await?;
    out.task("Task finished", &finished);
    Ok(())
}

/// Wait for a terminal state; Ctrl-C stops the task
async fn follow(manager: &TaskManager, id: &TaskId) -> anyhow::Result<Task> {
    let wait = async {
        loop {
            match manager.wait_terminal(id, FOLLOW_SLICE).await {
                Err(Error::Timeout(_)) => continue,
                other => return other,
            }
        }
    };

    tokio::select! {
        result = wait => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            let stopped = manager.stop(id).await?;
            // Let the grace period run so the process is gone when we exit
            let deadline = manager.config().grace_period + Duration::from_secs(1);
            let _ = tokio::time::timeout(deadline, async {
                while manager.supervisor().running_count().await > 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;
            Ok(stopped)
        }
    }
}
