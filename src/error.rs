//! Error types for supervisor and backup operations.
//!
//! Every public operation of the core returns a definite outcome with one of
//! the kinds below. State-machine violations (`AlreadyRunning`, `NotRunning`)
//! leave the supervisor untouched; I/O failures inside multi-step operations
//! report the step that failed and keep every earlier side effect.

use std::path::PathBuf;

/// Result type for supervisor and backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Supervisor and backup errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The wrapped process could not be launched.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command channel of the wrapped process is closed.
    #[error("command channel is closed")]
    ChannelClosed,

    /// The process did not accept a console line in time. The channel is
    /// closed afterwards since part of the line may have been written.
    #[error("server console did not accept input within {timeout_ms} ms")]
    CommandTimeout { timeout_ms: u64 },

    /// `start` was called while a process is already under supervision.
    #[error("server is already running")]
    AlreadyRunning,

    /// The operation needs a running process.
    #[error("server is not running")]
    NotRunning,

    /// Neither the graceful stop nor the forced kill terminated the process.
    #[error("failed to stop server (pid {pid}): {reason}")]
    StopFailed { pid: u32, reason: String },

    /// A command was empty or contained a line break.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The persistent-state directory does not exist.
    #[error("world directory not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// Archive could not be written (includes same-second name collisions).
    #[error("archive I/O error in {context}: {source}")]
    ArchiveIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Archive could not be extracted; the target was left untouched.
    #[error("failed to extract '{archive}': {reason}")]
    Extraction { archive: String, reason: String },

    /// The named backup does not exist.
    #[error("backup not found: {name}")]
    NotFound { name: String },

    /// Retention would drop below the configured floor without confirmation.
    #[error("refusing to keep {requested} backups, floor is {floor} (confirmation required)")]
    RetentionBelowFloor { requested: usize, floor: usize },

    /// Restore aborted because the snapshot of the current world failed.
    #[error("pre-restore snapshot failed: {source}")]
    PreSnapshotFailed {
        #[source]
        source: Box<Error>,
    },

    /// Extraction of the selected backup failed.
    #[error("restore failed (current world saved as {pre_restore}): {source}")]
    RestoreFailed {
        pre_restore: String,
        #[source]
        source: Box<Error>,
    },

    /// The restore completed but the server could not be started again.
    #[error("restore completed but restart failed: {source}")]
    RestartFailed {
        pre_restore: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error (task join failures, scheduler errors).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch error for `program`.
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// Create an archive I/O error with context.
    pub fn archive_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::ArchiveIo {
            context: context.into(),
            source,
        }
    }

    /// Create an extraction error.
    pub fn extraction(archive: impl Into<String>, reason: impl ToString) -> Self {
        Self::Extraction {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// True when an archive with the same timestamped name already exists.
    ///
    /// Callers may retry once the wall clock has moved to the next second.
    pub fn is_name_collision(&self) -> bool {
        matches!(
            self,
            Self::ArchiveIo { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists
        )
    }

    /// Stable identifier of the error kind, used for metrics labels and CLI output.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "launch_error",
            Self::ChannelClosed => "channel_closed",
            Self::CommandTimeout { .. } => "command_timeout",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::StopFailed { .. } => "stop_failed",
            Self::InvalidCommand(_) => "invalid_command",
            Self::SourceMissing { .. } => "source_missing",
            Self::ArchiveIo { .. } => "archive_io_error",
            Self::Extraction { .. } => "extraction_error",
            Self::NotFound { .. } => "not_found",
            Self::RetentionBelowFloor { .. } => "retention_below_floor",
            Self::PreSnapshotFailed { .. } => "pre_snapshot_failed",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::RestartFailed { .. } => "restart_failed",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// True for caller mistakes that leave all state unchanged.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning
                | Self::NotRunning
                | Self::InvalidCommand(_)
                | Self::NotFound { .. }
                | Self::RetentionBelowFloor { .. }
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_name_collision_detection() {
        let collision = Error::archive_io(
            "creating world_backup_20250101_120000.zip",
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        );
        assert!(collision.is_name_collision());

        let other = Error::archive_io("writing", io::Error::other("disk full"));
        assert!(!other.is_name_collision());
        assert!(!Error::NotRunning.is_name_collision());
    }

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(Error::AlreadyRunning.kind(), "already_running");
        assert_eq!(Error::NotRunning.kind(), "not_running");
        assert_eq!(Error::not_found("x").kind(), "not_found");
        assert_eq!(
            Error::PreSnapshotFailed {
                source: Box::new(Error::NotRunning)
            }
            .kind(),
            "pre_snapshot_failed"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::AlreadyRunning.is_recoverable());
        assert!(Error::NotRunning.is_recoverable());
        assert!(!Error::ChannelClosed.is_recoverable());
        assert!(
            !Error::StopFailed {
                pid: 1,
                reason: "x".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_restore_failed_mentions_snapshot() {
        let err = Error::RestoreFailed {
            pre_restore: "world_backup_20250101_120001.zip".into(),
            source: Box::new(Error::extraction("a.zip", "truncated")),
        };
        let message = err.to_string();
        assert!(message.contains("world_backup_20250101_120001.zip"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
