//! ralphd - autonomous task-execution daemon
//!
//! CLI entry point for starting, stopping and inspecting the daemon.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use ralphd::cli::{Cli, Command, OutputFormat};
use ralphd::config::{Config, LoggingConfig};
use ralphd::daemon::DaemonManager;
use ralphd::{
    AuditLog, AutoGate, DirSource, HandlerRegistry, HealthRegistry, MemorySource, Ralph, RalphEngine,
    RalphState, RetryExecutor, StepDispatcher, StepResult, Task, TaskDecomposer, TaskSource, TaskStatus,
    Watchdog,
};

fn setup_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    // Create log directory
    let log_dir = logging.dir();
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("ralphd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first so logging can honor its directory
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.verbose, &config.logging).context("Failed to setup logging")?;

    info!(queue = %config.queue.dir.display(), "ralphd loaded config");

    // Dispatch command
    match cli.command {
        Some(Command::Start { foreground }) => cmd_start(&config, foreground).await,
        Some(Command::Stop) => cmd_stop().await,
        Some(Command::Status { format }) => cmd_status(format).await,
        Some(Command::Run { task_file }) => cmd_run(&config, &task_file).await,
        Some(Command::Queue) => cmd_queue(&config).await,
        Some(Command::RunDaemon) => cmd_run_daemon(&config).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Start the daemon
async fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("ralphd is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting ralphd in foreground mode...");
        run_daemon(config).await
    } else {
        let pid = daemon.start()?;
        println!("ralphd started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
async fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    let Some(pid) = daemon.running_pid() else {
        println!("ralphd is not running");
        return Ok(());
    };

    daemon.stop()?;
    println!("ralphd stopped (was PID: {})", pid);
    Ok(())
}

/// Show daemon status
async fn cmd_status(format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "version": status.version,
                "pid_file": status.pid_file.to_string_lossy()
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("ralphd Status");
            println!("-------------");
            if status.running {
                println!("Status: {}", "running".green());
                if let Some(pid) = status.pid {
                    println!("PID: {}", pid);
                }
                if let Some(version) = &status.version {
                    println!("Version: {}", version);
                }
            } else {
                println!("Status: {}", "stopped".red());
            }
            println!("PID file: {}", status.pid_file.display());
        }
    }

    Ok(())
}

/// Show queue depths
async fn cmd_queue(config: &Config) -> Result<()> {
    let source = DirSource::new(&config.queue.dir);
    let depths = source.depths().await.context("Failed to read queue")?;

    println!("Queue: {}", config.queue.dir.display());
    println!("  pending:           {}", depths.pending);
    println!("  awaiting approval: {}", depths.awaiting_approval);
    println!("  in progress:       {}", depths.in_progress);
    Ok(())
}

/// Process a single task file to completion (batch mode)
async fn cmd_run(config: &Config, task_file: &Path) -> Result<()> {
    let content =
        fs::read_to_string(task_file).context(format!("Failed to read {}", task_file.display()))?;
    let stem = task_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("task")
        .to_string();
    let title = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(&stem)
        .to_string();

    println!("Processing task: {}", title.bold());
    println!();

    let source = Arc::new(MemorySource::new());
    source.push(Task::new(&stem, &title, &content));
    let wiring = build_engine(config, source.clone());

    let Some(task) = source.next_eligible().await? else {
        return Err(eyre::eyre!("Task vanished before processing"));
    };
    let done = wiring.engine.process_task(task).await;

    for step in &done.steps {
        let mark = match step.result {
            Some(StepResult::Success) => "✓".green(),
            Some(_) => "✗".red(),
            None => "-".dimmed(),
        };
        let timing = step.duration_ms.map(|ms| format!(" ({ms}ms)")).unwrap_or_default();
        println!("  {} [{}] {}{}", mark, step.category, step.description, timing);
    }
    println!();

    match done.status {
        TaskStatus::Completed => {
            println!("{} Task completed ({} steps)", "✓".green(), done.total_steps);
            Ok(())
        }
        _ => {
            println!(
                "{} Task failed: {}",
                "✗".red(),
                done.last_error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;

    run_daemon(config).await
}

/// Fully wired engine plus the shared records the watchdog reads
struct Wiring {
    engine: Arc<RalphEngine>,
    registry: Arc<HealthRegistry>,
    audit: Arc<AuditLog>,
}

/// Wire up the engine over a task source
fn build_engine(config: &Config, source: Arc<dyn TaskSource>) -> Wiring {
    let audit = Arc::new(AuditLog::default());
    let registry = Arc::new(HealthRegistry::new(
        config.recovery.circuit_threshold,
        config.recovery.reset_window(),
        audit.clone(),
    ));
    let recovery = RetryExecutor::new(registry.clone());
    let decomposer = TaskDecomposer::new(recovery, config.recovery.retry.clone());
    let dispatcher = StepDispatcher::new(
        HandlerRegistry::new(),
        Duration::from_secs(config.engine.step_timeout_secs),
        audit.clone(),
    );

    let engine = Arc::new(RalphEngine::new(
        Arc::new(RalphState::new()),
        source,
        decomposer,
        dispatcher,
        Arc::new(AutoGate::default()),
        config.engine.clone(),
        audit.clone(),
    ));

    Wiring { engine, registry, audit }
}

/// Run the daemon main loop
async fn run_daemon(config: &Config) -> Result<()> {
    info!("ralphd starting...");

    // Queue layout first; a crashed run may have left tasks in processing/
    let source = Arc::new(DirSource::new(&config.queue.dir));
    source.init().await.context("Failed to create queue directories")?;
    let recovered = source.recover().await.context("Failed to recover stranded tasks")?;
    if recovered > 0 {
        info!(recovered, "Requeued tasks left in processing by a previous run");
    }

    let wiring = build_engine(config, source.clone());
    let ralph = Arc::new(Ralph::new(wiring.engine));
    ralph.start().await?;
    info!("Execution loop started");

    let watchdog = Arc::new(Watchdog::new(
        config.watchdog.clone(),
        ralph.clone(),
        source.clone(),
        wiring.registry,
        wiring.audit,
    ));
    let watchdog_handle = tokio::spawn({
        let watchdog = watchdog.clone();
        async move { watchdog.run().await }
    });
    info!("Watchdog started");

    info!("Daemon running. Press Ctrl+C to stop.");

    // Set up signal handlers
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        // On non-Unix, just wait for Ctrl+C
        tokio::signal::ctrl_c().await?;
    }

    info!("Daemon shutting down...");

    watchdog_handle.abort();
    ralph.stop().await?;

    info!("Daemon stopped");
    Ok(())
}
