//! Centralized defaults and limits.
//!
//! Timeouts, capacities and naming conventions shared by the supervisor,
//! the backup store and the configuration layer live here so they can be
//! tuned in one place.

// =============================================================================
// Supervisor
// =============================================================================

/// Number of console lines kept in memory.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 100;

/// Command written to the server's console to request a graceful shutdown.
pub const DEFAULT_STOP_COMMAND: &str = "stop";

/// How long `stop` waits for the server to exit after the stop command (30 s).
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// How long a console write may block on a full stdin pipe (5 s).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// How long to wait for the process to be reaped after a forced kill (10 s).
pub const DEFAULT_KILL_GRACE_SECS: u64 = 10;

/// Readiness window before the server is assumed to be running (60 s).
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;

/// Tokens that must all appear on one console line to signal readiness.
///
/// Matches `Done (4.210s)! For help, type "help"`.
pub const DEFAULT_READY_TOKENS: [&str; 2] = ["Done", "help"];

/// Quiescence delay between the stop and start halves of a restart (2 s).
pub const DEFAULT_RESTART_DELAY_MS: u64 = 2000;

/// How long to let the capture task drain buffered output after exit.
pub const OUTPUT_DRAIN_TIMEOUT_MS: u64 = 2000;

/// How long to wait for a reapable exit once the output stream has ended.
pub const EXIT_REAP_TIMEOUT_MS: u64 = 1000;

/// Delay between sending `list` and scanning the console for the roster.
pub const ROSTER_REPLY_DELAY_MS: u64 = 500;

/// Number of recent console lines searched for the roster reply.
pub const ROSTER_SCAN_LINES: usize = 10;

// =============================================================================
// Backups
// =============================================================================

/// Archive name prefix: `world_backup_20250101_120000.zip`.
pub const DEFAULT_BACKUP_PREFIX: &str = "world_backup";

/// Archive file extension.
pub const BACKUP_EXTENSION: &str = "zip";

/// Timestamp layout embedded in archive names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Interval between scheduled backups (3 hours).
pub const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 3 * 60 * 60;

/// Number of backups kept by the scheduler.
pub const DEFAULT_RETENTION: usize = 10;

/// Retention below this count requires explicit operator confirmation.
pub const DEFAULT_RETENTION_FLOOR: usize = 5;

/// Maximum number of scheduler runs kept in memory.
pub const MAX_RUN_HISTORY: usize = 100;

// =============================================================================
// Paths
// =============================================================================

/// Directory under the home directory holding warden's own files.
pub const WARDEN_HOME_DIR: &str = ".warden";

/// Configuration file name inside [`WARDEN_HOME_DIR`].
pub const CONFIG_FILE_NAME: &str = "warden.toml";
