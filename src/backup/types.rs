//! Backup records and the archive naming convention.
//!
//! Archive names are `<prefix>_<YYYYMMDD_HHMMSS>.zip`. The name is the only
//! index: the set of records is the directory listing, ordered by the
//! embedded timestamp.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{BACKUP_EXTENSION, BACKUP_TIMESTAMP_FORMAT};

/// Who asked for a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created by the scheduler.
    Auto,
    /// Created by an operator or as a pre-restore snapshot.
    Manual,
}

impl Origin {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown backup origin: {other}")),
        }
    }
}

/// An archive in the backup directory. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// File name, e.g. `world_backup_20250101_120000.zip`.
    pub name: String,
    /// Full path of the archive.
    pub path: PathBuf,
    /// Creation time embedded in the name (local time).
    pub created_at: NaiveDateTime,
    /// Archive size on disk.
    pub size_bytes: u64,
    /// Who created it.
    pub origin: Origin,
}

/// Aggregate numbers over all records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    /// Number of archives.
    pub count: usize,
    /// Combined size of all archives.
    pub total_bytes: u64,
}

/// Builds the archive file name for `created_at`.
pub fn archive_name(prefix: &str, created_at: NaiveDateTime) -> String {
    format!(
        "{prefix}_{}.{BACKUP_EXTENSION}",
        created_at.format(BACKUP_TIMESTAMP_FORMAT)
    )
}

/// Parses the timestamp out of an archive name with the given prefix.
///
/// Returns `None` for anything that does not follow the convention,
/// including in-progress temporary files.
pub fn parse_archive_name(prefix: &str, name: &str) -> Option<NaiveDateTime> {
    let stem = name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(BACKUP_EXTENSION)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stem, BACKUP_TIMESTAMP_FORMAT).ok()
}
