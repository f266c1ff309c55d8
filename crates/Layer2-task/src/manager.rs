//! Task Manager - owns the registry and drives task lifecycles
//!
//! Features:
//! - Task CRUD with strictly increasing `updated_at`
//! - Start with conflict then dependency resolution
//! - Stop with graceful-then-forced termination
//! - Exit handling serialised against every other mutation
//! - Whole-registry persistence through a [`TaskStore`]

use crate::log::{self, LogTail, LOGS_DIR};
use crate::registry::Registry;
use crate::state::TaskStatus;
use crate::store::{JsonTaskStore, TaskStore};
use crate::supervisor::{
    ExitEvent, OutputSink, ProcessHandle, ProcessSupervisor, SpawnRequest, SupervisorConfig,
};
use crate::task::{NewTask, Task, TaskId, TaskType, TaskUpdate};
use async_recursion::async_recursion;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_foundation::{Error, Result, WardenConfig};

/// Poll interval for `wait_terminal`
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Root of persisted state
    pub data_dir: PathBuf,

    /// Where per-task log files go
    pub logs_dir: PathBuf,

    /// Persist after every mutation
    pub auto_save: bool,

    /// SIGTERM -> SIGKILL interval
    pub grace_period: Duration,

    /// Delay after stopping conflicting tasks
    pub conflict_settle: Duration,

    /// Delay between stop and start in `restart`
    pub restart_delay: Duration,

    /// Bound on opening a log file
    pub log_open_timeout: Duration,
}

impl TaskManagerConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&WardenConfig::new().data_dir(data_dir))
    }

    /// Resolve from the layered file configuration
    pub fn from_config(config: &WardenConfig) -> Self {
        let data_dir = config.resolved_data_dir();
        Self {
            logs_dir: data_dir.join(LOGS_DIR),
            data_dir,
            auto_save: config.resolved_auto_save(),
            grace_period: config.grace_period(),
            conflict_settle: config.conflict_settle(),
            restart_delay: config.restart_delay(),
            log_open_timeout: config.log_open_timeout(),
        }
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    pub fn conflict_settle(mut self, delay: Duration) -> Self {
        self.conflict_settle = delay;
        self
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn log_open_timeout(mut self, timeout: Duration) -> Self {
        self.log_open_timeout = timeout;
        self
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self::from_config(&WardenConfig::new())
    }
}

/// Shared state; the exit listener only holds a `Weak` to it
pub(crate) struct ManagerInner {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) supervisor: Arc<ProcessSupervisor>,
    pub(crate) config: TaskManagerConfig,
    session: RwLock<String>,
    storage_error: Option<String>,
    listener: OnceLock<AbortHandle>,
}

impl ManagerInner {
    /// Write the registry back when auto-save is on. Failures are logged.
    pub(crate) async fn persist(&self, registry: &Registry) {
        if !self.config.auto_save {
            return;
        }
        if let Err(e) = self.store.save_all(&registry.snapshot()).await {
            error!("Failed to save tasks to {} store: {}", self.store.name(), e);
        }
    }

    async fn on_exit(&self, event: ExitEvent) {
        let Some(task_id) = event.task_id.clone() else {
            return;
        };

        let mut registry = self.registry.lock().await;
        if !registry.owns(&task_id, event.handle) {
            debug!(
                "Ignoring exit of {} for task {}: no longer attached",
                event.handle, task_id
            );
            return;
        }
        registry.detach(&task_id);

        let Some(task) = registry.get_mut(&task_id) else {
            return;
        };
        task.exit_code = Some(event.exit_code);
        task.set_status(if event.success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        });
        info!(
            "Task {} {} (exit code {})",
            task_id,
            task.status.as_str(),
            event.exit_code
        );

        self.persist(&registry).await;
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get() {
            listener.abort();
        }
    }
}

/// Task Manager - handles task lifecycle and execution
#[derive(Clone)]
pub struct TaskManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl TaskManager {
    /// Load the registry once and start listening for process exits
    pub async fn open(
        config: TaskManagerConfig,
        store: Arc<dyn TaskStore>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Result<Self> {
        let (registry, storage_error) = match store.load_all().await {
            Ok(tasks) => (Registry::from_tasks(tasks), None),
            Err(e @ Error::StorageCorrupt(_)) => {
                warn!("Task store is unreadable, starting empty: {}", e);
                (Registry::new(), Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let exits = supervisor
            .take_exit_events()
            .await
            .ok_or_else(|| Error::Internal("supervisor exit events already taken".into()))?;

        debug!(
            "Loaded {} tasks from {} store",
            registry.len(),
            store.name()
        );

        let inner = Arc::new(ManagerInner {
            registry: Mutex::new(registry),
            store,
            supervisor,
            config,
            session: RwLock::new(Uuid::new_v4().to_string()),
            storage_error,
            listener: OnceLock::new(),
        });
        let listener = tokio::spawn(listen(Arc::downgrade(&inner), exits));
        let _ = inner.listener.set(listener.abort_handle());

        Ok(Self { inner })
    }

    /// `tasks.json` under the configured data dir, with a fresh supervisor
    pub async fn with_json_store(config: TaskManagerConfig) -> Result<Self> {
        let store = Arc::new(JsonTaskStore::new(&config.data_dir));
        let supervisor = Arc::new(ProcessSupervisor::with_config(SupervisorConfig {
            grace_period: config.grace_period,
        }));
        Self::open(config, store, supervisor).await
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.inner.supervisor
    }

    /// Set when the stored document could not be parsed at startup
    pub fn storage_error(&self) -> Option<&str> {
        self.inner.storage_error.as_deref()
    }

    /// Persist now, regardless of `auto_save`
    pub async fn save(&self) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        self.inner.store.save_all(&registry.snapshot()).await
    }

    // ========== Sessions ==========

    pub async fn session_id(&self) -> String {
        self.inner.session.read().await.clone()
    }

    /// Mint a new session id for tasks created from now on
    pub async fn start_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        *self.inner.session.write().await = id.clone();
        info!("Started session {}", id);
        id
    }

    // ========== CRUD ==========

    pub async fn create(&self, draft: NewTask) -> Result<Task> {
        if draft.title.trim().is_empty() {
            return Err(Error::InvalidInput("task title must not be empty".into()));
        }

        let session = self.session_id().await;
        let task = Task::new(draft, session);

        let mut registry = self.inner.registry.lock().await;
        registry.insert(task.clone());
        self.inner.persist(&registry).await;

        info!("Created task {} ({})", task.id, task.title);
        Ok(task)
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.registry.lock().await.get(id).cloned()
    }

    /// Snapshot of every task in registry order
    pub async fn all(&self) -> Vec<Task> {
        self.inner.registry.lock().await.snapshot()
    }

    pub async fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<Task> {
        let mut registry = self.inner.registry.lock().await;
        let task = registry.get(id).ok_or_else(|| task_not_found(id))?;

        if let Some(status) = update.status {
            if !task.status.can_become(status) {
                return Err(Error::InvalidInput(format!(
                    "task {} is {} and cannot go back to {}",
                    id,
                    task.status.as_str(),
                    status.as_str()
                )));
            }
        }

        // Finishing a task through update releases its process
        let finishing = update.status.map(|s| s.is_terminal()).unwrap_or(false);
        if finishing {
            if let Some(handle) = registry.detach(id) {
                self.terminate(handle).await;
            }
        }

        let task = registry.get_mut(id).ok_or_else(|| task_not_found(id))?;
        update.apply(task);
        let updated = task.clone();
        self.inner.persist(&registry).await;

        debug!("Updated task {}", id);
        Ok(updated)
    }

    /// Remove a task, terminating its process first
    pub async fn delete(&self, id: &TaskId) -> Result<Task> {
        let mut registry = self.inner.registry.lock().await;
        let (task, handle) = registry.remove(id).ok_or_else(|| task_not_found(id))?;
        if let Some(handle) = handle {
            self.terminate(handle).await;
        }
        self.inner.persist(&registry).await;

        info!("Deleted task {}", id);
        Ok(task)
    }

    pub async fn complete(&self, id: &TaskId) -> Result<Task> {
        let mut registry = self.inner.registry.lock().await;
        if !registry.contains(id) {
            return Err(task_not_found(id));
        }
        if let Some(handle) = registry.detach(id) {
            self.terminate(handle).await;
        }

        let task = registry.get_mut(id).ok_or_else(|| task_not_found(id))?;
        task.set_status(TaskStatus::Completed);
        let completed = task.clone();
        self.inner.persist(&registry).await;

        info!("Completed task {}", id);
        Ok(completed)
    }

    // ========== Lifecycle ==========

    /// Start a task: stop its conflicts, start its dependencies, then run it
    pub async fn start(&self, id: &TaskId) -> Result<Task> {
        let mut chain = Vec::new();
        self.start_in_chain(id, &mut chain).await
    }

    #[async_recursion]
    async fn start_in_chain(&self, id: &TaskId, chain: &mut Vec<TaskId>) -> Result<Task> {
        if let Some(pos) = chain.iter().position(|c| c == id) {
            let mut cycle: Vec<String> = chain[pos..].iter().map(|c| c.to_string()).collect();
            cycle.push(id.to_string());
            return Err(Error::DependencyCycle(cycle));
        }

        let task = self.get(id).await.ok_or_else(|| task_not_found(id))?;
        if task.is_active() {
            debug!("Task {} is already {}", id, task.status.as_str());
            return Ok(task);
        }

        // 1. Conflicts
        let running_conflicts: Vec<TaskId> = {
            let registry = self.inner.registry.lock().await;
            task.conflicts
                .iter()
                .filter(|c| **c != *id)
                .filter(|c| registry.get(c).map(Task::is_active).unwrap_or(false))
                .cloned()
                .collect()
        };
        for conflict in &running_conflicts {
            info!("Stopping conflicting task {} before {}", conflict, id);
            if let Err(e) = self.stop(conflict).await {
                warn!("Failed to stop conflicting task {}: {}", conflict, e);
            }
            tokio::time::sleep(self.inner.config.conflict_settle).await;
        }

        // 2. Dependencies
        chain.push(id.clone());
        for dependency in &task.dependencies {
            let needs_start = self
                .get(dependency)
                .await
                .map(|d| !d.is_active())
                .unwrap_or(false);
            if needs_start {
                info!("Starting dependency {} of {}", dependency, id);
                self.start_in_chain(dependency, chain).await?;
            }
        }
        chain.pop();

        // 3. The task itself
        self.launch(id).await
    }

    async fn launch(&self, id: &TaskId) -> Result<Task> {
        let (command, cwd, log_path) = {
            let mut registry = self.inner.registry.lock().await;
            let task = registry.get_mut(id).ok_or_else(|| task_not_found(id))?;
            if task.is_active() {
                return Ok(task.clone());
            }

            if !task.has_command() {
                reset_for_run(task);
                task.set_status(TaskStatus::InProgress);
                let started = task.clone();
                self.inner.persist(&registry).await;
                info!("Task {} in progress", id);
                return Ok(started);
            }

            let log_path = task
                .log_file
                .clone()
                .unwrap_or_else(|| log::default_log_path(&self.inner.config.logs_dir, id.as_str()));
            (task.command.clone().unwrap_or_default(), task.cwd.clone(), log_path)
        };

        let file = log::open_append(&log_path, self.inner.config.log_open_timeout).await?;

        let mut request = SpawnRequest::new(command)
            .sink(OutputSink::File(file))
            .task(id.clone());
        if let Some(cwd) = cwd {
            request = request.cwd(cwd);
        }

        // Spawn and attach under the lock so the exit event can't overtake us
        let mut registry = self.inner.registry.lock().await;
        let task = registry.get_mut(id).ok_or_else(|| task_not_found(id))?;
        if task.is_active() {
            return Ok(task.clone());
        }
        task.log_file = Some(log_path);

        match self.inner.supervisor.spawn(request).await {
            Ok(handle) => {
                reset_for_run(task);
                task.process_id = Some(handle.pid);
                task.set_status(TaskStatus::Running);
                let started = task.clone();
                if let Some(previous) = registry.attach(id.clone(), handle) {
                    warn!("Task {} still owned {}, terminating it", id, previous);
                    self.terminate(previous).await;
                }
                self.inner.persist(&registry).await;

                info!("Task {} running as pid {}", id, handle.pid);
                Ok(started)
            }
            Err(e) => {
                task.set_status(TaskStatus::Failed);
                self.inner.persist(&registry).await;

                warn!("Task {} failed to start: {}", id, e);
                Err(e)
            }
        }
    }

    /// Cancel a task. Returns before the process has actually exited.
    pub async fn stop(&self, id: &TaskId) -> Result<Task> {
        let mut registry = self.inner.registry.lock().await;
        let status = registry.get(id).ok_or_else(|| task_not_found(id))?.status;

        let handle = registry.detach(id);
        if handle.is_none() && status.is_terminal() {
            return registry.get(id).cloned().ok_or_else(|| task_not_found(id));
        }
        if let Some(handle) = handle {
            self.terminate(handle).await;
        }

        let task = registry.get_mut(id).ok_or_else(|| task_not_found(id))?;
        task.set_status(TaskStatus::Cancelled);
        let stopped = task.clone();
        self.inner.persist(&registry).await;

        info!("Stopped task {}", id);
        Ok(stopped)
    }

    /// `stop`, wait `restart_delay`, `start`
    pub async fn restart(&self, id: &TaskId) -> Result<Task> {
        self.stop(id).await?;
        tokio::time::sleep(self.inner.config.restart_delay).await;
        self.start(id).await
    }

    /// Poll until the task is terminal
    pub async fn wait_terminal(&self, id: &TaskId, timeout: Duration) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get(id).await.ok_or_else(|| task_not_found(id))?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "task {} still {} after {:.1}s",
                    id,
                    task.status.as_str(),
                    timeout.as_secs_f64()
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Is a supervised process currently attached to the task?
    pub async fn is_attached(&self, id: &TaskId) -> bool {
        self.inner.registry.lock().await.attached(id).is_some()
    }

    async fn terminate(&self, handle: ProcessHandle) {
        match self
            .inner
            .supervisor
            .terminate(handle, self.inner.config.grace_period)
            .await
        {
            Ok(true) => debug!("Terminating {}", handle),
            Ok(false) => debug!("{} had already exited", handle),
            Err(e) => warn!("Failed to terminate {}: {}", handle, e),
        }
    }

    // ========== Background process tasks ==========

    /// Create a `background_process` task for `draft.command` and start it
    pub async fn create_background_task(&self, draft: NewTask) -> Result<Task> {
        let has_command = draft
            .command
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !has_command {
            return Err(Error::InvalidInput(
                "background task requires a command".into(),
            ));
        }

        let task = self
            .create(draft.task_type(TaskType::BackgroundProcess))
            .await?;
        self.start(&task.id).await
    }

    pub async fn kill_background_task(&self, id: &TaskId) -> Result<Task> {
        match self.get(id).await {
            Some(task) if task.task_type == TaskType::BackgroundProcess => self.stop(id).await,
            _ => Err(Error::not_found(format!("background task {}", id))),
        }
    }

    // ========== Import / export ==========

    /// Write the whole registry as a JSON array. Returns the task count.
    pub async fn export_all(&self, path: &Path) -> Result<usize> {
        let tasks = self.all().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&tasks)?;
        tokio::fs::write(path, content).await?;

        info!("Exported {} tasks to {}", tasks.len(), path.display());
        Ok(tasks.len())
    }

    /// Insert tasks whose id is not present yet. Returns how many were inserted.
    pub async fn import_all(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let tasks: Vec<Task> = serde_json::from_str(&content)?;

        let mut registry = self.inner.registry.lock().await;
        let inserted = tasks
            .into_iter()
            .filter(|task| registry.insert(task.clone()))
            .count();
        if inserted > 0 {
            self.inner.persist(&registry).await;
        }

        info!("Imported {} tasks from {}", inserted, path.display());
        Ok(inserted)
    }

    // ========== Logs ==========

    /// Last `lines` lines of the task's log file
    pub async fn read_log_tail(&self, id: &TaskId, lines: usize) -> Result<LogTail> {
        let task = self.get(id).await.ok_or_else(|| task_not_found(id))?;
        let path = task
            .log_file
            .unwrap_or_else(|| log::default_log_path(&self.inner.config.logs_dir, id.as_str()));
        log::read_tail(&path, lines).await
    }

    /// Terminate every supervised process
    pub async fn shutdown(&self) -> usize {
        self.inner.supervisor.shutdown().await
    }
}

/// Clear the results of a previous run
fn reset_for_run(task: &mut Task) {
    task.exit_code = None;
    task.completed_at = None;
}

pub(crate) fn task_not_found(id: &TaskId) -> Error {
    Error::not_found(format!("task {}", id))
}

async fn listen(inner: Weak<ManagerInner>, mut exits: mpsc::UnboundedReceiver<ExitEvent>) {
    while let Some(event) = exits.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_exit(event).await;
    }
    debug!("Exit listener stopped");
}
