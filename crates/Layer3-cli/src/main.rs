//! taskwarden CLI - Main entry point

mod commands;
mod output;

use clap::{Parser, Subcommand};
use output::Output;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_foundation::{Error, WardenConfig};
use warden_task::{TaskManager, TaskManagerConfig, TaskPriority, TaskStatus, TaskType};

/// taskwarden - task tracking with supervised background processes
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Do not write tasks.json after changes
    #[arg(long, global = true)]
    no_auto_save: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new task
    Create {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, default_value = "medium")]
        priority: TaskPriority,
        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long = "type", default_value = "task")]
        task_type: TaskType,
        /// Shell command run when the task starts
        #[arg(short, long)]
        command: Option<String>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long)]
        project: Option<String>,
        /// Comma-separated ids stopped before this task starts
        #[arg(long, value_delimiter = ',')]
        conflicts: Vec<String>,
        /// Comma-separated ids started before this task starts
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
    },
    /// List tasks, most recently updated first
    List {
        #[arg(short, long)]
        status: Option<TaskStatus>,
        #[arg(short, long)]
        priority: Option<TaskPriority>,
        #[arg(long = "type")]
        task_type: Option<TaskType>,
        /// Matches tasks with any of these tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        project: Option<String>,
        /// Show only current session tasks
        #[arg(long)]
        session: bool,
    },
    /// Show task details
    Show { id: String },
    /// Update task fields
    Update {
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        status: Option<TaskStatus>,
        #[arg(short, long)]
        priority: Option<TaskPriority>,
        #[arg(short, long)]
        command: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Mark a task completed
    Complete { id: String },
    /// Delete a task
    Delete { id: String },
    /// Start a task
    Start {
        id: String,
        /// Stay attached until the task finishes (Ctrl-C stops it)
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop a task
    ///
    /// Only processes started by this same invocation (`start --wait`) are
    /// signalled. A process left running by an earlier `warden` call is not
    /// tracked any more, so its task is only marked cancelled.
    Stop { id: String },
    /// Stop then start a task
    Restart {
        id: String,
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop every running task
    StopAll {
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "type")]
        task_type: Option<TaskType>,
    },
    /// Delete every completed, failed or cancelled task
    Cleanup,
    /// Apply start/stop/restart/remove to many tasks
    Batch {
        action: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Find tasks by pid or command pattern
    Find {
        #[arg(long, conflicts_with = "command", required_unless_present = "command")]
        pid: Option<u32>,
        /// Case-insensitive regular expression
        #[arg(long)]
        command: Option<String>,
    },
    /// Show the last lines of a task's log
    Logs {
        id: String,
        #[arg(short = 'n', long, default_value_t = warden_task::DEFAULT_TAIL_LINES)]
        lines: usize,
    },
    /// Hints before running a command
    Suggest { command: String },
    /// Show current session ID
    Session {
        /// Start a new session
        #[arg(long)]
        new: bool,
    },
    /// Export all tasks to a JSON file
    Export { file: PathBuf },
    /// Import tasks from a JSON file
    Import { file: PathBuf },
    /// List background processes
    #[command(alias = "background")]
    Bashes {
        /// Show only running processes
        #[arg(long)]
        running: bool,
    },
    /// Create and start a background process task
    BgCreate {
        title: String,
        command: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, default_value = "medium")]
        priority: TaskPriority,
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(short, long)]
        wait: bool,
    },
    /// Kill a background process task
    BgKill { id: String },
    /// Show output of a background process task
    BgLogs {
        id: String,
        #[arg(short = 'n', long, default_value_t = warden_task::DEFAULT_TAIL_LINES)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let output = Output::new(args.json);

    let manager = match open_manager(&args).await {
        Ok(manager) => manager,
        Err(e) => {
            output.failure(&format!("{:#}", e));
            std::process::exit(1);
        }
    };

    if let Some(problem) = manager.storage_error() {
        if !args.json {
            eprintln!("Warning: stored tasks could not be read, starting empty ({})", problem);
        }
    }

    if let Err(e) = commands::run(&manager, args.command, output).await {
        output.failure(&format!("{:#}", e));
        if !args.json {
            let data_dir = &manager.config().data_dir;
            if let Some(hint) = e.downcast_ref::<Error>().and_then(|e| error_hint(e, data_dir)) {
                eprintln!("{}", hint);
            }
        }
        if !args.debug && !args.json && is_internal(&e) {
            eprintln!("Run with --debug for details.");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn is_internal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<Error>()
        .map(|e| !e.is_user_facing())
        .unwrap_or(false)
}

fn error_hint(e: &Error, data_dir: &std::path::Path) -> Option<String> {
    e.is_io()
        .then(|| format!("Check that {} is writable.", data_dir.display()))
}

/// Layered config file plus command-line overrides
async fn open_manager(args: &Args) -> anyhow::Result<TaskManager> {
    let mut config = WardenConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        WardenConfig::default()
    });
    if let Some(dir) = &args.data_dir {
        config = config.data_dir(dir);
    }
    if args.no_auto_save {
        config = config.auto_save(false);
    }

    let manager = TaskManager::with_json_store(TaskManagerConfig::from_config(&config)).await?;
    tracing::debug!("Data dir: {}", manager.config().data_dir.display());
    Ok(manager)
}
