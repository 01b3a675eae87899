//! World backups.
//!
//! - [`BackupStore`]: timestamp-named zip archives of the world directory
//! - [`BackupScheduler`]: periodic `Auto` backups with retention
//! - [`BackupCoordinator`]: manual backups and guarded restores that hold the
//!   supervisor exclusively
//!
//! Archives are named `<prefix>_<YYYYMMDD_HHMMSS>.zip`; the name is the
//! listing and retention order.

mod archive;
pub mod coordinator;
pub mod scheduler;
pub mod store;
pub mod types;


pub use coordinator::{BackupCoordinator, RestoreReport};
pub use scheduler::{BackupRun, BackupScheduler, ScheduleSettings, SchedulerStats};
pub use store::{BackupSettings, BackupStore};
pub use types::{BackupRecord, BackupStats, Origin, archive_name, parse_archive_name};
