//! 태스크 라이프사이클 통합 테스트 - 실제 셸 프로세스 사용
//!
//! `cargo test -p warden-task --test lifecycle_test`

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warden_task::{
    JsonTaskStore, LogTail, NewTask, ProcessSupervisor, SupervisorConfig, Task, TaskFilter,
    TaskId, TaskManager, TaskManagerConfig, TaskStatus, TaskStore, TaskType,
};

const WAIT: Duration = Duration::from_secs(10);

fn config(dir: &TempDir) -> TaskManagerConfig {
    TaskManagerConfig::new(dir.path())
        .grace_period(Duration::from_millis(300))
        .conflict_settle(Duration::from_millis(50))
        .restart_delay(Duration::from_millis(50))
}

async fn open(dir: &TempDir) -> TaskManager {
    let config = config(dir);
    let supervisor = Arc::new(ProcessSupervisor::with_config(SupervisorConfig {
        grace_period: config.grace_period,
    }));
    let store = Arc::new(JsonTaskStore::new(dir.path()));
    TaskManager::open(config, store, supervisor).await.unwrap()
}

async fn create(manager: &TaskManager, draft: NewTask) -> Task {
    manager.create(draft).await.unwrap()
}

async fn status(manager: &TaskManager, id: &TaskId) -> TaskStatus {
    manager.get(id).await.unwrap().status
}

/// Poll until the supervisor has seen `pid` exit
async fn wait_process_gone(manager: &TaskManager, pid: u32) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        match manager.supervisor().find_by_pid(pid).await {
            Some(record) if record.is_running() => {}
            _ => return true,
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_start_stop_sleep() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let a = create(&manager, NewTask::new("sleeper").command("sleep 5")).await;

    let started = manager.start(&a.id).await.unwrap();
    assert_eq!(started.status, TaskStatus::Running);
    let pid = started.process_id.expect("pid recorded");
    assert!(manager.is_attached(&a.id).await);

    let stopped = manager.stop(&a.id).await.unwrap();
    assert_eq!(stopped.status, TaskStatus::Cancelled);
    assert_eq!(stopped.process_id, Some(pid));
    assert!(stopped.log_file.is_some());
    assert!(!manager.is_attached(&a.id).await);

    // 유예 시간이 지나면 프로세스가 사라져야 함
    assert!(wait_process_gone(&manager, pid).await);
    assert_eq!(status(&manager, &a.id).await, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_natural_exit_after_stop_stays_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    // SIGTERM 무시 후 정상 종료(0) - 유예 시간 내에 끝남
    config.grace_period = Duration::from_secs(5);
    let manager = TaskManager::open(
        config,
        Arc::new(JsonTaskStore::new(dir.path())),
        Arc::new(ProcessSupervisor::new()),
    )
    .await
    .unwrap();

    let task = create(
        &manager,
        NewTask::new("stubborn").command("trap '' TERM; sleep 0.5; exit 0"),
    )
    .await;
    let pid = manager.start(&task.id).await.unwrap().process_id.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop(&task.id).await.unwrap();
    assert!(wait_process_gone(&manager, pid).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = manager.get(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.completed_at.is_none());
}

#[tokio::test]
async fn test_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let ok = create(&manager, NewTask::new("ok").command("exit 0")).await;
    let bad = create(&manager, NewTask::new("bad").command("exit 2")).await;

    manager.start(&ok.id).await.unwrap();
    manager.start(&bad.id).await.unwrap();

    let ok = manager.wait_terminal(&ok.id, WAIT).await.unwrap();
    assert_eq!(ok.status, TaskStatus::Completed);
    assert_eq!(ok.exit_code, Some(0));
    assert!(ok.completed_at.is_some());

    let bad = manager.wait_terminal(&bad.id, WAIT).await.unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(bad.exit_code, Some(2));
    assert!(bad.completed_at.is_none());
}

#[tokio::test]
async fn test_spawn_failure_marks_failed() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let task = create(
        &manager,
        NewTask::new("nowhere")
            .command("true")
            .cwd(dir.path().join("missing")),
    )
    .await;

    let result = manager.start(&task.id).await;
    assert!(matches!(result, Err(warden_foundation::Error::Spawn(_))));
    assert_eq!(status(&manager, &task.id).await, TaskStatus::Failed);
}

#[tokio::test]
async fn test_conflict_stopped_first() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let a = create(&manager, NewTask::new("server").command("sleep 30")).await;
    let b = create(
        &manager,
        NewTask::new("build")
            .command("sleep 30")
            .conflicts(vec![a.id.clone()]),
    )
    .await;

    manager.start(&a.id).await.unwrap();
    let b_started = manager.start(&b.id).await.unwrap();
    assert_eq!(b_started.status, TaskStatus::Running);

    let a_now = manager.get(&a.id).await.unwrap();
    assert_eq!(a_now.status, TaskStatus::Cancelled);
    assert!(a_now.updated_at < b_started.updated_at);

    manager.stop(&b.id).await.unwrap();
}

#[tokio::test]
async fn test_dependency_started_first() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let db = create(&manager, NewTask::new("db").command("sleep 30")).await;
    let notes = create(&manager, NewTask::new("notes")).await;
    let app = create(
        &manager,
        NewTask::new("app")
            .command("sleep 30")
            .dependencies(vec![db.id.clone(), notes.id.clone(), TaskId::from("ghost")]),
    )
    .await;

    let app_started = manager.start(&app.id).await.unwrap();

    let db_now = manager.get(&db.id).await.unwrap();
    let notes_now = manager.get(&notes.id).await.unwrap();
    assert_eq!(db_now.status, TaskStatus::Running);
    assert_eq!(notes_now.status, TaskStatus::InProgress);
    assert!(db_now.updated_at < app_started.updated_at);
    assert!(notes_now.updated_at < app_started.updated_at);

    // 이미 실행 중인 의존성은 다시 시작하지 않음
    let pid = db_now.process_id;
    manager.stop(&app.id).await.unwrap();
    manager.start(&app.id).await.unwrap();
    assert_eq!(manager.get(&db.id).await.unwrap().process_id, pid);

    assert_eq!(manager.stop_all(&Default::default()).await, 3);
}

#[tokio::test]
async fn test_restart_runs_again_and_appends_log() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let task = create(&manager, NewTask::new("echo").command("echo run")).await;

    manager.start(&task.id).await.unwrap();
    let first = manager.wait_terminal(&task.id, WAIT).await.unwrap();
    assert_eq!(first.status, TaskStatus::Completed);

    manager.restart(&task.id).await.unwrap();
    let second = manager.wait_terminal(&task.id, WAIT).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.log_file, first.log_file);

    let tail = manager.read_log_tail(&task.id, 10).await.unwrap();
    assert_eq!(tail, LogTail::Lines(vec!["run".into(), "run".into()]));
}

#[tokio::test]
async fn test_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let task = create(
        &manager,
        NewTask::new("noisy").command("for i in 1 2 3 4 5; do echo line$i; done; echo err 1>&2"),
    )
    .await;
    let never = create(&manager, NewTask::new("never").command("true")).await;

    manager.start(&task.id).await.unwrap();
    manager.wait_terminal(&task.id, WAIT).await.unwrap();

    let tail = manager.read_log_tail(&task.id, 2).await.unwrap();
    assert_eq!(tail, LogTail::Lines(vec!["line5".into(), "err".into()]));
    assert_eq!(
        manager.read_log_tail(&never.id, 10).await.unwrap(),
        LogTail::NoLogs
    );

    let log_file = manager.get(&task.id).await.unwrap().log_file.unwrap();
    assert!(log_file.starts_with(dir.path().join("logs")));
}

#[tokio::test]
async fn test_delete_terminates_process() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let task = create(&manager, NewTask::new("doomed").command("sleep 30")).await;
    let pid = manager.start(&task.id).await.unwrap().process_id.unwrap();

    manager.delete(&task.id).await.unwrap();
    assert!(manager.get(&task.id).await.is_none());
    assert!(wait_process_gone(&manager, pid).await);
}

#[tokio::test]
async fn test_background_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;

    let bg = manager
        .create_background_task(NewTask::new("watcher").command("sleep 30"))
        .await
        .unwrap();
    assert_eq!(bg.task_type, TaskType::BackgroundProcess);
    assert_eq!(bg.status, TaskStatus::Running);

    create(&manager, NewTask::new("plain")).await;
    let listed = manager.list_background_tasks().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, bg.id);

    let killed = manager.kill_background_task(&bg.id).await.unwrap();
    assert_eq!(killed.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_batch_start_mixed() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let x = create(&manager, NewTask::new("x").command("sleep 30")).await;
    let y = TaskId::from("missing");

    let result = manager.batch_start(&[x.id.clone(), y.clone()]).await;
    assert_eq!(result.succeeded, vec![x.id.clone()]);
    assert_eq!(result.failed_ids(), vec![&y]);

    let stopped = manager.batch_stop(&[x.id.clone()]).await;
    assert!(stopped.is_complete_success());
    assert_eq!(status(&manager, &x.id).await, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<TaskId> = {
        let manager = open(&dir).await;
        let a = create(&manager, NewTask::new("a").tags(["x"])).await;
        let b = create(&manager, NewTask::new("b")).await;
        manager.complete(&b.id).await.unwrap();
        vec![a.id, b.id]
    };

    let stored = JsonTaskStore::new(dir.path()).load_all().await.unwrap();
    assert_eq!(stored.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), ids);

    let manager = open(&dir).await;
    let b = manager.get(&ids[1]).await.unwrap();
    assert_eq!(b.status, TaskStatus::Completed);
    assert!(b.completed_at.is_some());
    assert_eq!(
        manager
            .list_tasks(&TaskFilter::new().tags(["x"]))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_export_import_idempotent() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let export = source_dir.path().join("export").join("tasks.json");

    let source = open(&source_dir).await;
    create(&source, NewTask::new("one")).await;
    create(&source, NewTask::new("two")).await;
    assert_eq!(source.export_all(&export).await.unwrap(), 2);

    let target = open(&target_dir).await;
    let existing = create(&target, NewTask::new("local")).await;
    assert_eq!(target.import_all(&export).await.unwrap(), 2);
    assert_eq!(target.import_all(&export).await.unwrap(), 0);
    assert_eq!(target.all().await.len(), 3);
    assert_eq!(target.get(&existing.id).await.unwrap().title, "local");
}

#[tokio::test]
async fn test_running_task_cannot_return_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let manager = open(&dir).await;
    let task = create(&manager, NewTask::new("once").command("sleep 30")).await;
    let pid = manager.start(&task.id).await.unwrap().process_id.unwrap();

    let result = manager
        .update(&task.id, warden_task::TaskUpdate::new().status(TaskStatus::Pending))
        .await;
    assert!(matches!(result, Err(warden_foundation::Error::InvalidInput(_))));

    // 두 번째 start는 같은 프로세스를 유지해야 함
    let again = manager.start(&task.id).await.unwrap();
    assert_eq!(again.process_id, Some(pid));
    assert_eq!(manager.supervisor().running_count().await, 1);

    manager.stop(&task.id).await.unwrap();
    assert!(wait_process_gone(&manager, pid).await);
    assert_eq!(manager.supervisor().running_count().await, 0);
}

#[tokio::test]
async fn test_settle_delay_after_each_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let settle = Duration::from_millis(300);
    let manager = TaskManager::open(
        config(&dir).conflict_settle(settle),
        Arc::new(JsonTaskStore::new(dir.path())),
        Arc::new(ProcessSupervisor::new()),
    )
    .await
    .unwrap();

    let a = create(&manager, NewTask::new("a").command("sleep 30")).await;
    let b = create(&manager, NewTask::new("b").command("sleep 30")).await;
    let c = create(
        &manager,
        NewTask::new("c").conflicts(vec![a.id.clone(), b.id.clone()]),
    )
    .await;
    manager.start(&a.id).await.unwrap();
    manager.start(&b.id).await.unwrap();

    let began = tokio::time::Instant::now();
    manager.start(&c.id).await.unwrap();
    assert!(began.elapsed() >= settle * 2);

    let a_now = manager.get(&a.id).await.unwrap();
    let b_now = manager.get(&b.id).await.unwrap();
    assert_eq!(a_now.status, TaskStatus::Cancelled);
    assert_eq!(b_now.status, TaskStatus::Cancelled);
    assert!(b_now.updated_at - a_now.updated_at >= chrono::Duration::milliseconds(300));
}

#[tokio::test]
async fn test_log_open_timeout_is_io_error() {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;

    let dir = tempfile::tempdir().unwrap();
    let manager = TaskManager::open(
        config(&dir).log_open_timeout(Duration::from_millis(200)),
        Arc::new(JsonTaskStore::new(dir.path())),
        Arc::new(ProcessSupervisor::new()),
    )
    .await
    .unwrap();
    let task = create(&manager, NewTask::new("blocked").command("echo hi")).await;

    // 읽는 쪽이 없는 FIFO는 쓰기용 open이 막힘
    let logs = dir.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    let fifo = logs.join(format!("{}.log", task.id));
    let c_path = std::ffi::CString::new(fifo.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

    let result = manager.start(&task.id).await;
    match result {
        Err(warden_foundation::Error::Io(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::TimedOut)
        }
        other => panic!("expected Io timeout, got {:?}", other),
    }
    assert_eq!(status(&manager, &task.id).await, TaskStatus::Pending);

    // 막힌 open을 풀어 줌
    let _reader = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&fifo)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
}
