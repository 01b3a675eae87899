//! `warden run`: supervise the server with an interactive console.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use warden::backup::BackupScheduler;
use warden::config::WardenConfig;
use warden::console::{self, ConsoleAction, QuickCommand};
use warden::error::Error;
use warden::supervisor::{OutputBuffer, StopOutcome};
use warden::utils::{format_bytes, format_uptime};

use super::{Runtime, print_error, print_records};

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Runs the supervisor, the backup scheduler and the console until `:quit`
/// or Ctrl-C, then stops the server gracefully.
pub async fn execute(config: &WardenConfig, no_start: bool) -> Result<()> {
    warden::metrics::init_metrics(config.metrics.listen)?;

    let runtime = Runtime::new(config);
    let mut scheduler = BackupScheduler::new(
        runtime.store.clone(),
        runtime.supervisor.clone(),
        config.schedule_settings(),
    )
    .await?;
    scheduler.start().await?;

    let echo = spawn_echo(runtime.supervisor.output());

    println!(
        "warden {} supervising '{}' in {}",
        env!("CARGO_PKG_VERSION"),
        config.server.program,
        config.server.working_dir.display()
    );
    println!("Type :help for actions, :quit to exit.\n");

    if !no_start {
        start(&runtime).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if handle_line(&runtime, &scheduler, &line).await == Flow::Quit {
                        break;
                    }
                },
                Ok(None) => {
                    tracing::info!("Console input closed, waiting for Ctrl-C");
                    stdin_open = false;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Console input failed, waiting for Ctrl-C");
                    stdin_open = false;
                },
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Backup scheduler did not shut down cleanly");
    }
    if runtime.supervisor.state().has_process() {
        stop(&runtime).await;
    }
    echo.abort();
    Ok(())
}

/// Prints console lines of the server as they arrive.
fn spawn_echo(output: &OutputBuffer) -> JoinHandle<()> {
    let mut feed = output.subscribe();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(line) => println!("{}", line.text),
                Err(RecvError::Lagged(skipped)) => {
                    println!("... {skipped} console lines skipped");
                },
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_line(runtime: &Runtime, scheduler: &BackupScheduler, line: &str) -> Flow {
    let action = match console::parse_line(line) {
        Ok(Some(action)) => action,
        Ok(None) => return Flow::Continue,
        Err(message) => {
            eprintln!("{message}");
            return Flow::Continue;
        },
    };

    let sup = &runtime.supervisor;
    match action {
        ConsoleAction::Command(text) => {
            if let Err(e) = sup.send_command(&text).await {
                print_error("Command", &e);
            }
        },
        ConsoleAction::Quick(quick) => {
            if let Err(e) = sup.send_command(quick.command()).await {
                print_error("Command", &e);
            }
        },
        ConsoleAction::Start => start(runtime).await,
        ConsoleAction::Stop => stop(runtime).await,
        ConsoleAction::Restart => match sup.restart().await {
            Ok(outcome) => println!("Server restarted (pid {})", outcome.pid),
            Err(e) => print_error("Restart", &e),
        },
        ConsoleAction::Status => status(runtime, scheduler).await,
        ConsoleAction::Log(n) => {
            for line in sup.output().snapshot(n) {
                println!("{line}");
            }
        },
        ConsoleAction::Players => match sup.online_players().await {
            Ok(Some(players)) if players.is_empty() => println!("No players online."),
            Ok(Some(players)) => println!("Online ({}): {}", players.len(), players.join(", ")),
            Ok(None) => println!("No player list in the recent console output."),
            Err(e) => print_error("Player list", &e),
        },
        ConsoleAction::Backup => match runtime.coordinator.backup_now().await {
            Ok(record) => println!(
                "Created {} ({})",
                record.name,
                format_bytes(record.size_bytes)
            ),
            Err(e) => print_error("Backup", &e),
        },
        ConsoleAction::Backups => {
            let store = runtime.store.clone();
            match tokio::task::spawn_blocking(move || store.list()).await {
                Ok(Ok(records)) => print_records(&records),
                Ok(Err(e)) => print_error("Listing backups", &e),
                Err(e) => print_error("Listing backups", &Error::from(e)),
            }
        },
        ConsoleAction::Restore(name) => match runtime.coordinator.restore_named(&name).await {
            Ok(report) => {
                println!("Restored {}", report.restored.name);
                println!("Previous world saved as {}", report.pre_restore.name);
            },
            Err(e) => print_error("Restore", &e),
        },
        ConsoleAction::Prune { keep, confirmed } => {
            match runtime.coordinator.prune(keep, confirmed).await {
                Ok(deleted) => println!("Deleted {} backups", deleted.len()),
                Err(e @ Error::RetentionBelowFloor { .. }) => {
                    eprintln!("{e}");
                    eprintln!("Repeat with --yes to confirm: :prune {keep} --yes");
                },
                Err(e) => print_error("Prune", &e),
            }
        },
        ConsoleAction::Help => {
            println!("{}", console::HELP);
            let names: Vec<_> = QuickCommand::ALL.iter().map(|q| q.name()).collect();
            println!("\nQuick commands: {}", names.join(", "));
        },
        ConsoleAction::Quit => return Flow::Quit,
    }
    Flow::Continue
}

async fn start(runtime: &Runtime) {
    match runtime.supervisor.start().await {
        Ok(outcome) => println!(
            "Server running (pid {}, readiness {:?})",
            outcome.pid, outcome.readiness
        ),
        Err(e) => print_error("Start", &e),
    }
}

async fn stop(runtime: &Runtime) {
    match runtime.supervisor.stop().await {
        Ok(StopOutcome::Forced) => println!("Server did not stop in time and was killed"),
        Ok(StopOutcome::Graceful { exit_code }) => match exit_code {
            Some(code) => println!("Server stopped (exit code {code})"),
            None => println!("Server stopped"),
        },
        Err(e) => print_error("Stop", &e),
    }
}

async fn status(runtime: &Runtime, scheduler: &BackupScheduler) {
    let report = runtime.supervisor.status().await;
    println!("State:    {}", report.state);
    if let (Some(pid), Some(uptime)) = (report.pid, report.uptime) {
        println!("PID:      {pid}");
        println!("Uptime:   {}", format_uptime(uptime));
    }
    if let Some(usage) = runtime.supervisor.resource_usage().await {
        println!("CPU:      {:.1}%", usage.cpu_percent);
        println!("Memory:   {}", format_bytes(usage.memory_bytes));
    }

    let store = runtime.store.clone();
    match tokio::task::spawn_blocking(move || store.stats())
        .await
        .context("stats task failed")
    {
        Ok(Ok(stats)) => println!(
            "Backups:  {} ({})",
            stats.count,
            format_bytes(stats.total_bytes)
        ),
        Ok(Err(e)) => print_error("Backup stats", &e),
        Err(e) => eprintln!("{e:#}"),
    }

    let runs = scheduler.stats();
    match runs.last_run {
        Some(last) => println!(
            "Last run: {} ({}), {} ok / {} failed",
            last.started_at.format("%Y-%m-%d %H:%M:%S"),
            if last.success { "ok" } else { "failed" },
            runs.success_count,
            runs.failure_count
        ),
        None if scheduler.is_scheduled() => println!("Last run: none yet"),
        None => println!("Last run: automatic backups disabled"),
    }
}
