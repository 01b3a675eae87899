//! Warden configuration.
//!
//! Loads settings from `~/.warden/warden.toml` (or an explicit path). Every
//! field has a default, so an empty file is a valid configuration.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! program = "java"
//! args = ["-Xms4G", "-Xmx8G", "-jar", "server.jar", "nogui"]
//! working_dir = "/srv/minecraft"
//! stop_timeout_secs = 30
//!
//! [backup]
//! world_dir = "world"
//! backup_dir = "backups"
//! interval_secs = 10800
//! retention = 10
//!
//! [logging]
//! format = "pretty"
//! level = "info"
//!
//! [metrics]
//! listen = "127.0.0.1:9102"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::backup::{BackupSettings, ScheduleSettings};
use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_BACKUP_INTERVAL_SECS, DEFAULT_BACKUP_PREFIX,
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_KILL_GRACE_SECS, DEFAULT_OUTPUT_CAPACITY,
    DEFAULT_READY_TIMEOUT_SECS, DEFAULT_READY_TOKENS, DEFAULT_RESTART_DELAY_MS, DEFAULT_RETENTION, DEFAULT_RETENTION_FLOOR, DEFAULT_STOP_COMMAND,
    DEFAULT_STOP_TIMEOUT_SECS, WARDEN_HOME_DIR,
};
use crate::error::Error;
use crate::logging::{LogConfig, LogFormat};
use crate::supervisor::{LaunchSpec, ReadinessProbe, SupervisorConfig};
use crate::utils::resolve_path;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerSection,
    pub backup: BackupSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
}

/// How to run the wrapped server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Executable to launch.
    pub program: String,
    /// Argument vector, passed through untouched.
    pub args: Vec<String>,
    /// Working directory of the server.
    pub working_dir: PathBuf,
    /// Console command for a graceful shutdown.
    pub stop_command: String,
    pub stop_timeout_secs: u64,
    pub kill_grace_secs: u64,
    /// How long a console write may block before the pipe is given up on.
    pub command_timeout_ms: u64,
    /// Tokens that must all appear on one line to mark the server ready.
    /// An empty list skips the readiness wait.
    pub ready_tokens: Vec<String>,
    pub ready_timeout_secs: u64,
    pub restart_delay_ms: u64,
    /// Console lines kept in memory.
    pub output_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: ["-Xms1G", "-Xmx2G", "-jar", "server.jar", "nogui"]
                .into_iter()
                .map(String::from)
                .collect(),
            working_dir: PathBuf::from("."),
            stop_command: DEFAULT_STOP_COMMAND.to_string(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            kill_grace_secs: DEFAULT_KILL_GRACE_SECS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            ready_tokens: DEFAULT_READY_TOKENS.iter().map(|t| (*t).to_string()).collect(),
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

/// Where backups come from, where they go, and how many to keep.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// World directory, relative to `server.working_dir` unless absolute.
    pub world_dir: PathBuf,
    /// Backup directory, relative to `server.working_dir` unless absolute.
    pub backup_dir: PathBuf,
    pub prefix: String,
    /// Run the periodic scheduler.
    pub enabled: bool,
    pub interval_secs: u64,
    /// 7-field cron expression (UTC); overrides `interval_secs`.
    pub cron: Option<String>,
    /// Archives kept by the scheduler.
    pub retention: usize,
    /// Smallest retention accepted without confirmation.
    pub floor: usize,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            backup_dir: PathBuf::from("backups"),
            prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            enabled: true,
            interval_secs: DEFAULT_BACKUP_INTERVAL_SECS,
            cron: None,
            retention: DEFAULT_RETENTION,
            floor: DEFAULT_RETENTION_FLOOR,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}

/// Prometheus exporter settings. Disabled unless `listen` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub listen: Option<SocketAddr>,
}

impl WardenConfig {
    /// Load configuration from `path`, or from `~/.warden/warden.toml`.
    ///
    /// A missing default file yields the defaults; an explicit path must
    /// exist. Invalid files and invalid values are errors.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = Self::config_path()?;
                if !default_path.exists() {
                    tracing::debug!(
                        path = %default_path.display(),
                        "Config not found, using defaults"
                    );
                    return Ok(Self::default());
                }
                default_path
            },
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config in {}", config_path.display()))?;

        tracing::debug!(
            path = %config_path.display(),
            program = %config.server.program,
            backups = config.backup.enabled,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Get the path to the default configuration file.
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(WARDEN_HOME_DIR).join(CONFIG_FILE_NAME))
    }

    /// Rejects values the supervisor or store cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let server = &self.server;
        if server.program.trim().is_empty() {
            return Err(Error::Config("server.program must not be empty".into()));
        }
        if server.stop_command.trim().is_empty() || server.stop_command.contains(['\r', '\n']) {
            return Err(Error::Config(
                "server.stop_command must be a single non-empty line".into(),
            ));
        }
        if server.output_capacity == 0 {
            return Err(Error::Config("server.output_capacity must be at least 1".into()));
        }
        if server.stop_timeout_secs == 0 {
            return Err(Error::Config("server.stop_timeout_secs must be at least 1".into()));
        }
        if server.command_timeout_ms == 0 {
            return Err(Error::Config("server.command_timeout_ms must be at least 1".into()));
        }

        let backup = &self.backup;
        if backup.prefix.is_empty() || backup.prefix.contains(['/', '\\']) {
            return Err(Error::Config(
                "backup.prefix must be a non-empty file name fragment".into(),
            ));
        }
        if backup.retention < backup.floor {
            return Err(Error::Config(format!(
                "backup.retention ({}) is below backup.floor ({})",
                backup.retention, backup.floor
            )));
        }
        if backup.interval_secs == 0 {
            return Err(Error::Config("backup.interval_secs must be at least 1".into()));
        }
        if let Some(cron) = &backup.cron {
            if cron.split_whitespace().count() != 7 {
                return Err(Error::Config(format!(
                    "backup.cron must have 7 fields (sec min hour day month weekday year): {cron}"
                )));
            }
        }

        self.log_level()?;
        Ok(())
    }

    fn log_level(&self) -> crate::error::Result<Level> {
        self.logging
            .level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level: {}", self.logging.level)))
    }

    /// World directory resolved against the server working directory.
    pub fn world_dir(&self) -> PathBuf {
        resolve_path(&self.server.working_dir, &self.backup.world_dir)
    }

    /// Backup directory resolved against the server working directory.
    pub fn backup_dir(&self) -> PathBuf {
        resolve_path(&self.server.working_dir, &self.backup.backup_dir)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let server = &self.server;
        let launch = LaunchSpec::new(server.program.clone(), server.working_dir.clone())
            .args(server.args.clone());
        SupervisorConfig::new(launch)
            .stop_command(server.stop_command.clone())
            .stop_timeout(Duration::from_secs(server.stop_timeout_secs))
            .kill_grace(Duration::from_secs(server.kill_grace_secs))
            .command_timeout(Duration::from_millis(server.command_timeout_ms))
            .readiness(ReadinessProbe::new(
                server.ready_tokens.iter().map(String::as_str),
                Duration::from_secs(server.ready_timeout_secs),
            ))
            .restart_delay(Duration::from_millis(server.restart_delay_ms))
            .output_capacity(server.output_capacity)
    }

    pub fn backup_settings(&self) -> BackupSettings {
        BackupSettings::new(self.world_dir(), self.backup_dir())
            .prefix(self.backup.prefix.clone())
            .retention_floor(self.backup.floor)
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            interval: Duration::from_secs(self.backup.interval_secs),
            cron: self.backup.cron.clone(),
            retention: self.backup.retention,
            enabled: self.backup.enabled,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::default()
            .format(self.logging.format)
            .level(self.log_level().unwrap_or(Level::INFO))
    }
}
