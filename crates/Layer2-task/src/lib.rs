//! # warden-task
//!
//! Task lifecycle engine and process supervision for taskwarden.
//!
//! ## Features
//!
//! - Task registry with a strict state machine
//! - Conflict and dependency resolution before a task starts
//! - Shell process supervision with SIGTERM -> SIGKILL escalation
//! - Batch and aggregate operations with per-task outcomes
//! - Whole-registry JSON persistence, export and import
//! - Log tail reads without shelling out

mod keyword;
mod registry;

pub mod batch;
pub mod log;
pub mod manager;
pub mod query;
pub mod state;
pub mod store;
pub mod suggest;
pub mod supervisor;
pub mod task;

// Engine
pub use batch::{BatchAction, BatchFailure, BatchResult, StopFilter};
pub use manager::{TaskManager, TaskManagerConfig};
pub use query::TaskFilter;
pub use suggest::suggest_actions;

// Task model
pub use state::TaskStatus;
pub use task::{NewTask, Task, TaskId, TaskPriority, TaskType, TaskUpdate};

// Persistence and logs
pub use log::{LogTail, DEFAULT_TAIL_LINES};
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore, TASKS_FILE};

// Process supervision
pub use supervisor::{
    BackgroundProcess, ExitEvent, OutputSink, ProcessHandle, ProcessStatistics, ProcessStatus,
    ProcessSupervisor, SpawnRequest, SupervisorConfig, DEFAULT_GRACE_PERIOD,
};
