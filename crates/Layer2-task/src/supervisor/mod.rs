//! Process supervisor - spawns shell commands and owns their lifecycle
//!
//! Features:
//! - Shell command spawning in its own process group
//! - Output redirected to a file (append) or captured in memory
//! - Graceful shutdown with SIGTERM -> SIGKILL escalation
//! - Exactly one asynchronous exit event per spawned process
//!
//! Every `Child` is owned by a watcher task. Signals are sent as messages to
//! that task, which delivers them only while the child is still un-reaped.

mod process;
mod signal;

pub use process::{
    BackgroundProcess, ExitEvent, OutputSink, ProcessHandle, ProcessStatistics, ProcessStatus,
    SpawnRequest,
};

use crate::task::TaskId;
use chrono::Utc;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_foundation::{Error, Result};

/// Default interval between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for capture readers to drain after exit
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grace period used by `kill_process`, `kill_all` and `shutdown`
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Message to the watcher task that owns a child
#[derive(Debug, Clone, Copy)]
enum Control {
    Terminate,
    Kill,
}

/// Live entry, present until the process has exited
struct LiveProcess {
    control: mpsc::UnboundedSender<Control>,
    /// Pending force-kill timer
    kill_timer: Option<AbortHandle>,
}

/// Process supervisor
pub struct ProcessSupervisor {
    /// All records by handle id, kept after exit until `cleanup`
    records: Arc<RwLock<HashMap<Uuid, BackgroundProcess>>>,

    /// Processes that have not exited yet
    live: Arc<Mutex<HashMap<Uuid, LiveProcess>>>,

    exit_tx: mpsc::UnboundedSender<ExitEvent>,

    /// Taken once by whoever consumes exit events
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<ExitEvent>>>,

    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    pub fn with_config(config: SupervisorConfig) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            records: Arc::new(RwLock::new(HashMap::with_capacity(16))),
            live: Arc::new(Mutex::new(HashMap::with_capacity(16))),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Take the exit event stream. Only the first caller gets it.
    pub async fn take_exit_events(&self) -> Option<mpsc::UnboundedReceiver<ExitEvent>> {
        self.exit_rx.lock().await.take()
    }

    /// Spawn `request.command` through the platform shell
    pub async fn spawn(&self, request: SpawnRequest) -> Result<ProcessHandle> {
        let SpawnRequest {
            command,
            cwd,
            sink,
            task_id,
        } = request;

        // Determine shell
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg).arg(&command).stdin(Stdio::null());

        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }

        // Own process group so termination reaches the whole pipeline
        #[cfg(unix)]
        cmd.process_group(0);

        let capture = match sink {
            OutputSink::File(file) => {
                let stderr = file.try_clone()?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(stderr));
                false
            }
            OutputSink::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                true
            }
            OutputSink::Null => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                false
            }
        };

        debug!("Spawning `{}` in {:?}", command, cwd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("`{}`: {}", command, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Spawn(format!("`{}`: no pid assigned", command)))?;

        let handle = ProcessHandle {
            id: Uuid::new_v4(),
            pid,
        };

        let output = Arc::new(Mutex::new(Vec::new()));
        let readers = if capture {
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(spawn_reader(stdout, None, Arc::clone(&output)));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(spawn_reader(stderr, Some("[stderr] "), Arc::clone(&output)));
            }
            readers
        } else {
            Vec::new()
        };

        {
            let mut records = self.records.write().await;
            records.insert(
                handle.id,
                BackgroundProcess {
                    id: handle.id,
                    task_id: task_id.clone(),
                    process_id: pid,
                    command: command.clone(),
                    status: ProcessStatus::Running,
                    started_at: Utc::now(),
                    exit_code: None,
                    output: None,
                },
            );
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        {
            let mut live = self.live.lock().await;
            live.insert(
                handle.id,
                LiveProcess {
                    control: control_tx,
                    kill_timer: None,
                },
            );
        }

        let watcher = Watcher {
            handle,
            task_id,
            records: Arc::clone(&self.records),
            live: Arc::clone(&self.live),
            exit_tx: self.exit_tx.clone(),
            output: capture.then_some(output),
            readers,
        };
        tokio::spawn(watcher.run(child, control_rx));

        info!("Spawned process {} for `{}`", handle, command);
        Ok(handle)
    }

    /// Send SIGTERM now and SIGKILL after `grace_period` unless the process exits first.
    ///
    /// Returns immediately. `Ok(false)` when the process had already exited.
    pub async fn terminate(&self, handle: ProcessHandle, grace_period: Duration) -> Result<bool> {
        let mut live = self.live.lock().await;
        let Some(entry) = live.get_mut(&handle.id) else {
            debug!("terminate: process {} already exited", handle);
            return Ok(false);
        };

        if entry.control.send(Control::Terminate).is_err() {
            return Ok(false);
        }

        if let Some(previous) = entry.kill_timer.take() {
            previous.abort();
        }

        let control = entry.control.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            // Fails once the watcher has seen the exit: nothing left to kill.
            if control.send(Control::Kill).is_ok() {
                warn!(
                    "Process {} still alive after {:.1}s grace period, killing",
                    handle,
                    grace_period.as_secs_f64()
                );
            }
        });
        entry.kill_timer = Some(timer.abort_handle());

        debug!("Sent termination to {}", handle);
        Ok(true)
    }

    /// True until the process's exit has been observed
    pub async fn is_running(&self, handle: ProcessHandle) -> bool {
        self.live.lock().await.contains_key(&handle.id)
    }

    /// Number of live processes
    pub async fn running_count(&self) -> usize {
        self.live.lock().await.len()
    }

    // ========== Record queries ==========

    /// List records, newest first
    pub async fn list_processes(&self, status: Option<ProcessStatus>) -> Vec<BackgroundProcess> {
        let records = self.records.read().await;
        let mut list: Vec<BackgroundProcess> = records
            .values()
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    pub async fn get_process(&self, id: Uuid) -> Option<BackgroundProcess> {
        self.records.read().await.get(&id).cloned()
    }

    /// Most recent record for an OS pid
    pub async fn find_by_pid(&self, pid: u32) -> Option<BackgroundProcess> {
        self.list_processes(None)
            .await
            .into_iter()
            .find(|p| p.process_id == pid)
    }

    /// Captured output of a finished `Capture` process
    pub async fn process_output(&self, id: Uuid) -> Option<String> {
        self.records
            .read()
            .await
            .get(&id)
            .and_then(|p| p.output.clone())
    }

    /// Terminate by record id with the configured grace period
    pub async fn kill_process(&self, id: Uuid) -> Result<bool> {
        let handle = self
            .records
            .read()
            .await
            .get(&id)
            .map(BackgroundProcess::handle)
            .ok_or_else(|| Error::not_found(format!("process {}", id)))?;
        self.terminate(handle, self.config.grace_period).await
    }

    /// Terminate every running process, returning how many were signalled
    pub async fn kill_all(&self) -> usize {
        let running = self.list_processes(Some(ProcessStatus::Running)).await;
        let mut killed = 0;

        for process in running {
            match self.kill_process(process.id).await {
                Ok(true) => killed += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to kill process {}: {}", process.id, e),
            }
        }

        killed
    }

    /// Finished records, newest first
    pub async fn history(&self, limit: usize) -> Vec<BackgroundProcess> {
        self.list_processes(None)
            .await
            .into_iter()
            .filter(|p| !p.is_running())
            .take(limit)
            .collect()
    }

    /// Drop every record that is no longer running
    pub async fn cleanup(&self) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, p| p.is_running());
        let removed = before - records.len();
        if removed > 0 {
            debug!("Cleaned up {} process records", removed);
        }
        removed
    }

    pub async fn statistics(&self) -> ProcessStatistics {
        let records = self.records.read().await;
        let mut stats = ProcessStatistics {
            total: records.len(),
            ..Default::default()
        };
        for process in records.values() {
            match process.status {
                ProcessStatus::Running => stats.running += 1,
                ProcessStatus::Completed => stats.completed += 1,
                ProcessStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Best-effort termination of everything still alive
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<ProcessHandle> = {
            let live = self.live.lock().await;
            let records = self.records.read().await;
            live.keys()
                .filter_map(|id| records.get(id).map(BackgroundProcess::handle))
                .collect()
        };

        let mut signalled = 0;
        for handle in handles {
            if let Ok(true) = self.terminate(handle, self.config.grace_period).await {
                signalled += 1;
            }
        }
        if signalled > 0 {
            info!("Shutdown: terminating {} processes", signalled);
        }
        signalled
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one child until it exits
struct Watcher {
    handle: ProcessHandle,
    task_id: Option<TaskId>,
    records: Arc<RwLock<HashMap<Uuid, BackgroundProcess>>>,
    live: Arc<Mutex<HashMap<Uuid, LiveProcess>>>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    output: Option<Arc<Mutex<Vec<String>>>>,
    readers: Vec<JoinHandle<()>>,
}

impl Watcher {
    async fn run(self, mut child: Child, mut control: mpsc::UnboundedReceiver<Control>) {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(message) = control.recv() => match message {
                    Control::Terminate => signal::terminate(&mut child),
                    Control::Kill => signal::kill(&mut child),
                },
            }
        };

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!("Failed to wait for process {}: {}", self.handle, e);
                -1
            }
        };

        for reader in self.readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                debug!("Output reader for {} did not finish", self.handle);
            }
        }

        // Cancel any pending force-kill before the pid can be reused
        if let Some(entry) = self.live.lock().await.remove(&self.handle.id) {
            if let Some(timer) = entry.kill_timer {
                timer.abort();
            }
        }

        let output = match &self.output {
            Some(lines) => Some(lines.lock().await.join("\n")),
            None => None,
        };

        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&self.handle.id) {
                record.status = ProcessStatus::from_exit_code(exit_code);
                record.exit_code = Some(exit_code);
                record.output = output;
            }
        }

        info!("Process {} exited with code {}", self.handle, exit_code);

        let event = ExitEvent {
            handle: self.handle,
            task_id: self.task_id,
            exit_code,
        };
        if self.exit_tx.send(event).is_err() {
            debug!("No exit event consumer for {}", self.handle);
        }
    }
}

fn spawn_reader<R>(
    stream: R,
    prefix: Option<&'static str>,
    output: Arc<Mutex<Vec<String>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            let line = match prefix {
                Some(p) => format!("{}{}", p, line),
                None => line,
            };
            output.lock().await.push(line);
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<ExitEvent>) -> ExitEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("exit event timed out")
            .expect("exit channel closed")
    }

    #[tokio::test]
    async fn test_exit_event_delivered_once() {
        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();
        assert!(supervisor.take_exit_events().await.is_none());

        let handle = supervisor
            .spawn(SpawnRequest::new("exit 3").task(TaskId::from("t1")))
            .await
            .unwrap();

        let event = next_exit(&mut rx).await;
        assert_eq!(event.handle, handle);
        assert_eq!(event.exit_code, 3);
        assert_eq!(event.task_id, Some(TaskId::from("t1")));
        assert!(!supervisor.is_running(handle).await);

        // no second event
        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err());

        let record = supervisor.get_process(handle.id).await.unwrap();
        assert_eq!(record.status, ProcessStatus::Failed);
        assert_eq!(record.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_capture_output() {
        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();

        let handle = supervisor
            .spawn(SpawnRequest::new("echo hello; echo oops 1>&2").sink(OutputSink::Capture))
            .await
            .unwrap();
        let event = next_exit(&mut rx).await;
        assert!(event.success());

        let output = supervisor.process_output(handle.id).await.unwrap();
        assert!(output.contains("hello"));
        assert!(output.contains("[stderr] oops"));
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "existing\n").unwrap();

        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        supervisor
            .spawn(SpawnRequest::new("echo appended").sink(OutputSink::File(file)))
            .await
            .unwrap();
        next_exit(&mut rx).await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\nappended\n");
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();

        let handle = supervisor.spawn(SpawnRequest::new("sleep 30")).await.unwrap();
        assert!(supervisor.is_running(handle).await);

        assert!(supervisor
            .terminate(handle, Duration::from_secs(5))
            .await
            .unwrap());
        let event = next_exit(&mut rx).await;
        assert_eq!(event.handle, handle);
        assert!(!event.success());
        assert!(!supervisor.is_running(handle).await);

        // already gone
        assert!(!supervisor
            .terminate(handle, Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_force_kill_after_grace() {
        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();

        // ignores SIGTERM
        let handle = supervisor
            .spawn(SpawnRequest::new("trap '' TERM; sleep 30"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        supervisor
            .terminate(handle, Duration::from_millis(300))
            .await
            .unwrap();
        let event = next_exit(&mut rx).await;
        assert_eq!(event.handle, handle);
        assert_eq!(event.exit_code, -1);
    }

    #[tokio::test]
    async fn test_spawn_failure_bad_cwd() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor
            .spawn(SpawnRequest::new("true").cwd("/definitely/not/a/dir"))
            .await;
        assert!(matches!(result, Err(Error::Spawn(_))));
        assert_eq!(supervisor.statistics().await.total, 0);
    }

    #[tokio::test]
    async fn test_cleanup_and_statistics() {
        let supervisor = ProcessSupervisor::new();
        let mut rx = supervisor.take_exit_events().await.unwrap();

        supervisor.spawn(SpawnRequest::new("true")).await.unwrap();
        supervisor.spawn(SpawnRequest::new("false")).await.unwrap();
        let sleeper = supervisor.spawn(SpawnRequest::new("sleep 30")).await.unwrap();
        next_exit(&mut rx).await;
        next_exit(&mut rx).await;

        let stats = supervisor.statistics().await;
        assert_eq!(
            stats,
            ProcessStatistics {
                running: 1,
                completed: 1,
                failed: 1,
                total: 3
            }
        );
        assert_eq!(supervisor.history(10).await.len(), 2);

        assert_eq!(supervisor.cleanup().await, 2);
        let remaining = supervisor.list_processes(None).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, sleeper.id);

        assert_eq!(supervisor.shutdown().await, 1);
        next_exit(&mut rx).await;
    }

    #[tokio::test]
    async fn test_kill_unknown_process() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor.kill_process(Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
