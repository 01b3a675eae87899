//! warden - supervisor for a long-running game server.
//!
//! - `warden run` starts the server, captures its console, runs scheduled
//!   backups and forwards typed lines as server commands
//! - `warden backup ...` lists, creates, prunes and restores world backups
//!
//! See `warden --help` for full usage information.

#![allow(clippy::redundant_pub_crate)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

use warden::config::WardenConfig;
use warden::logging::{LogFormat, init_logging};

mod commands;

const AFTER_HELP: &str = "\
EXAMPLES:
  warden run                        Start the server with a console
  warden run --no-start             Open the console, start later with :start
  warden backup list                Show backups, oldest first
  warden backup prune --keep 5      Keep the five newest backups
  warden backup restore world_backup_20250101_120000.zip

Configuration is read from ~/.warden/warden.toml unless --config is given.";

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Supervise a game server: lifecycle, console and world backups")]
#[command(after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.warden/warden.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format override
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server under supervision
    ///
    /// Lines typed on stdin are sent to the server console. Lines starting
    /// with ':' are warden actions; type :help to list them. Ctrl-C stops
    /// the server gracefully before exiting.
    Run {
        /// Open the console without starting the server
        #[arg(long)]
        no_start: bool,
    },
    /// Manage world backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// List backups, oldest first
    List,
    /// Create a manual backup now
    Create,
    /// Delete one backup
    Delete {
        /// Archive file name
        name: String,
    },
    /// Delete the oldest backups beyond --keep
    Prune {
        /// Number of newest backups to keep
        #[arg(long)]
        keep: usize,
        /// Confirm keeping fewer than the configured floor
        #[arg(long)]
        yes: bool,
    },
    /// Restore a backup over the world directory
    ///
    /// The current world is archived first, so the restore can be undone.
    Restore {
        /// Archive file name
        name: String,
    },
    /// Show backup count, size and range
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = WardenConfig::load(cli.config.as_deref())?;

    let mut log_config = config.log_config();
    if let Some(format) = cli.log_format {
        log_config = log_config.format(format);
    }
    if cli.verbose {
        log_config = log_config.level(Level::DEBUG);
    }
    init_logging(&log_config);

    match cli.command {
        Commands::Run { no_start } => {
            commands::run::execute(&config, no_start).await?;
        },
        Commands::Backup { action } => {
            commands::backup::execute(&config, action).await?;
        },
    }

    Ok(())
}
