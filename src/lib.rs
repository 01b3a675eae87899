// =============================================================================
// Lint Configuration
// =============================================================================

#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![allow(missing_debug_implementations)] // Scheduler wraps JobScheduler, which lacks Debug

// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::missing_panics_doc)] // Panics only in tests
#![allow(clippy::module_name_repetitions)] // e.g., backup::BackupStore is clearer
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation
#![allow(clippy::cast_possible_truncation)] // Millisecond durations fit in u64

//! Library crate for warden.
//!
//! warden supervises one long-running server process (typically a Minecraft
//! server), captures its console, injects commands and manages backups of
//! its world directory.
//!
//! # Overview
//!
//! - [`supervisor::Supervisor`] - the `Stopped -> Starting -> Running ->
//!   Stopping` state machine around the child process
//! - [`supervisor::OutputBuffer`] - bounded console history
//! - [`backup::BackupStore`] - timestamp-named zip archives of the world
//! - [`backup::BackupScheduler`] - periodic automatic backups with retention
//! - [`backup::BackupCoordinator`] - guarded restore (stop, snapshot,
//!   extract, restart)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::backup::{BackupCoordinator, BackupSettings, BackupStore};
//! use warden::supervisor::{LaunchSpec, Supervisor, SupervisorConfig};
//!
//! # async fn example() -> warden::error::Result<()> {
//! let launch = LaunchSpec::new("java", "/srv/minecraft")
//!     .args(["-Xmx4G", "-jar", "server.jar", "nogui"]);
//! let supervisor = Supervisor::new(SupervisorConfig::new(launch));
//! supervisor.start().await?;
//! supervisor.send_command("say backup in 1 minute").await?;
//!
//! let store = Arc::new(BackupStore::new(BackupSettings::new(
//!     "/srv/minecraft/world",
//!     "/srv/minecraft/backups",
//! )));
//! let coordinator = BackupCoordinator::new(store, Arc::clone(&supervisor));
//! let record = coordinator.backup_now().await?;
//! coordinator.restore(&record).await?;
//! # Ok(())
//! # }
//! ```

/// World backups: store, scheduler and guarded restore.
pub mod backup;

/// Configuration file loading and validation.
///
/// ```
/// use warden::config::WardenConfig;
///
/// let config = WardenConfig::parse(r#"
/// [server]
/// program = "java"
/// working_dir = "/srv/minecraft"
///
/// [backup]
/// retention = 12
/// "#).unwrap();
/// assert_eq!(config.schedule_settings().retention, 12);
/// ```
pub mod config;

/// Operator console parsing and preset commands.
pub mod console;

/// Centralized defaults and limits.
pub mod constants;

/// Error types with structured context.
pub mod error;

/// Structured logging setup.
pub mod logging;

/// Prometheus metrics.
pub mod metrics;

/// Process supervision.
pub mod supervisor;

/// Formatting and path helpers.
pub mod utils;
