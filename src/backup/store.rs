//! On-disk backup store.
//!
//! The store owns one directory of timestamp-named zip archives and knows the
//! world directory they are taken from. All methods block on filesystem I/O;
//! async callers run them through `spawn_blocking`.

use chrono::{Local, NaiveDateTime, SubsecRound};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::archive::{extract_archive, read_origin, write_archive};
use super::types::{BackupRecord, BackupStats, Origin, archive_name, parse_archive_name};
use crate::constants::{DEFAULT_BACKUP_PREFIX, DEFAULT_RETENTION_FLOOR};
use crate::error::{Error, Result};
use crate::metrics;

/// Where backups come from and where they go.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Persistent-state directory of the server.
    pub world_dir: PathBuf,
    /// Directory holding the archives.
    pub backup_dir: PathBuf,
    /// Archive name prefix.
    pub prefix: String,
    /// Smallest retention accepted without explicit confirmation.
    pub retention_floor: usize,
}

impl BackupSettings {
    /// Settings with the default prefix and retention floor.
    pub fn new(world_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            world_dir: world_dir.into(),
            backup_dir: backup_dir.into(),
            prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            retention_floor: DEFAULT_RETENTION_FLOOR,
        }
    }

    /// Set the archive name prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the retention floor.
    #[must_use]
    pub const fn retention_floor(mut self, floor: usize) -> Self {
        self.retention_floor = floor;
        self
    }
}

/// Timestamp-named archives of the world directory.
#[derive(Debug)]
pub struct BackupStore {
    settings: BackupSettings,
}

impl BackupStore {
    pub const fn new(settings: BackupSettings) -> Self {
        Self { settings }
    }

    pub fn world_dir(&self) -> &Path {
        &self.settings.world_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    pub const fn retention_floor(&self) -> usize {
        self.settings.retention_floor
    }

    /// Archives the world directory under the current local time.
    ///
    /// A second backup within the same wall-clock second fails with an
    /// `ArchiveIo` name collision (see [`Error::is_name_collision`]).
    pub fn create(&self, origin: Origin) -> Result<BackupRecord> {
        self.create_at(origin, Local::now().naive_local())
    }

    /// Archives the world directory under an explicit timestamp.
    ///
    /// Names carry whole seconds, so the returned record's `created_at` is
    /// truncated to match what [`list`](Self::list) reports later.
    pub fn create_at(&self, origin: Origin, created_at: NaiveDateTime) -> Result<BackupRecord> {
        let created_at = created_at.trunc_subsecs(0);
        let world = self.world_dir();
        if !world.is_dir() {
            return Err(Error::SourceMissing {
                path: world.to_path_buf(),
            });
        }

        let started = Instant::now();
        let name = archive_name(&self.settings.prefix, created_at);
        let result = self.write_new_archive(&name, origin);
        metrics::record_backup(origin, result.is_ok(), started.elapsed().as_secs_f64());

        let path = result?;
        let size_bytes = fs::metadata(&path)
            .map_err(|e| Error::archive_io(format!("reading size of {name}"), e))?
            .len();

        info!(
            backup = %name,
            origin = %origin,
            size_bytes = size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backup created"
        );

        Ok(BackupRecord {
            name,
            path,
            created_at,
            size_bytes,
            origin,
        })
    }

    /// Writes to a hidden partial file, then links it into place so that
    /// listings and retention never see a half-written archive.
    fn write_new_archive(&self, name: &str, origin: Origin) -> Result<PathBuf> {
        let dir = self.backup_dir();
        fs::create_dir_all(dir)
            .map_err(|e| Error::archive_io(format!("creating {}", dir.display()), e))?;

        let path = dir.join(name);
        // Early out only; publish_archive is what refuses to overwrite.
        if path.exists() {
            return Err(Error::archive_io(
                format!("creating {name}"),
                io::Error::new(io::ErrorKind::AlreadyExists, "backup already exists"),
            ));
        }

        let partial = dir.join(format!(".{name}.partial"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .map_err(|e| Error::archive_io(format!("creating {name}"), e))?;

        let written = write_archive(BufWriter::new(file), self.world_dir(), origin)
            .and_then(|writer| writer.into_inner().map_err(io::IntoInnerError::into_error))
            .and_then(|file| file.sync_all());

        if let Err(e) = written {
            discard_partial(&partial);
            return Err(Error::archive_io(format!("writing {name}"), e));
        }
        publish_archive(&partial, &path)
            .map_err(|e| Error::archive_io(format!("creating {name}"), e))?;
        Ok(path)
    }

    /// All archives, oldest first. Re-read from disk on every call.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let dir = self.backup_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::archive_io(format!("reading {}", dir.display()), e));
            },
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::archive_io(format!("reading {}", dir.display()), e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(created_at) = parse_archive_name(&self.settings.prefix, name) else {
                continue;
            };
            // Deleted between read_dir and stat: not a record any more.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let path = entry.path();
            let origin = read_origin(&path).unwrap_or_else(|e| {
                warn!(backup = %name, error = %e, "Unreadable archive");
                Origin::Manual
            });
            records.push(BackupRecord {
                name: name.to_string(),
                path,
                created_at,
                size_bytes: metadata.len(),
                origin,
            });
        }

        records.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(records)
    }

    /// Looks a record up by file name.
    pub fn find(&self, name: &str) -> Result<BackupRecord> {
        self.list()?
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| Error::not_found(name))
    }

    /// Number and combined size of all archives.
    pub fn stats(&self) -> Result<BackupStats> {
        let records = self.list()?;
        Ok(BackupStats {
            count: records.len(),
            total_bytes: records.iter().map(|r| r.size_bytes).sum(),
        })
    }

    /// Removes an archive.
    pub fn delete(&self, record: &BackupRecord) -> Result<()> {
        let path = self.backup_dir().join(&record.name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(backup = %record.name, "Backup deleted");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(&record.name)),
            Err(e) => Err(Error::archive_io(format!("deleting {}", record.name), e)),
        }
    }

    /// Deletes the oldest archives beyond `max_count`.
    ///
    /// Refuses with `RetentionBelowFloor` when `max_count` is below the
    /// configured floor; use [`Self::enforce_retention_confirmed`] for that.
    pub fn enforce_retention(&self, max_count: usize) -> Result<Vec<BackupRecord>> {
        let floor = self.settings.retention_floor;
        if max_count < floor {
            return Err(Error::RetentionBelowFloor {
                requested: max_count,
                floor,
            });
        }
        self.enforce_retention_confirmed(max_count)
    }

    /// Deletes the oldest archives beyond `max_count`, ignoring the floor.
    ///
    /// Returns the deleted records, oldest first. Archives still being
    /// written are invisible to the listing and never deleted.
    pub fn enforce_retention_confirmed(&self, max_count: usize) -> Result<Vec<BackupRecord>> {
        let records = self.list()?;
        let excess = records.len().saturating_sub(max_count);

        let mut deleted = Vec::with_capacity(excess);
        for record in records.into_iter().take(excess) {
            match self.delete(&record) {
                Ok(()) => deleted.push(record),
                Err(Error::NotFound { .. }) => {
                    debug!(backup = %record.name, "Already removed");
                },
                Err(e) => return Err(e),
            }
        }

        if !deleted.is_empty() {
            info!(deleted = deleted.len(), kept = max_count, "Retention enforced");
            metrics::record_pruned(deleted.len());
        }
        Ok(deleted)
    }

    /// Replaces `target` with the contents of `record`.
    ///
    /// The archive is extracted into a sibling staging directory first and
    /// swapped in with renames, so a failed extraction leaves `target`
    /// exactly as it was.
    pub fn restore_into(&self, record: &BackupRecord, target: &Path) -> Result<()> {
        let archive = self.backup_dir().join(&record.name);
        if !archive.is_file() {
            return Err(Error::not_found(&record.name));
        }

        let target_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::extraction(&record.name, "target has no directory name"))?;
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| Error::extraction(&record.name, e))?;

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let staging = parent.join(format!(".{target_name}.restore-{tag}"));
        fs::create_dir(&staging).map_err(|e| Error::extraction(&record.name, e))?;

        let entries = match extract_archive(&archive, &staging) {
            Ok(entries) => entries,
            Err(e) => {
                remove_tree(&staging);
                return Err(Error::extraction(&record.name, e));
            },
        };

        let displaced = parent.join(format!(".{target_name}.old-{tag}"));
        let had_target = target.exists();
        if had_target {
            if let Err(e) = fs::rename(target, &displaced) {
                remove_tree(&staging);
                return Err(Error::extraction(
                    &record.name,
                    format!("could not move current world aside: {e}"),
                ));
            }
        }

        if let Err(e) = fs::rename(&staging, target) {
            if had_target {
                if let Err(rollback) = fs::rename(&displaced, target) {
                    warn!(
                        path = %displaced.display(),
                        error = %rollback,
                        "Failed to put previous world back"
                    );
                }
            }
            remove_tree(&staging);
            return Err(Error::extraction(
                &record.name,
                format!("could not move restored world into place: {e}"),
            ));
        }

        if had_target {
            remove_tree(&displaced);
        }
        info!(backup = %record.name, entries = entries, target = %target.display(), "Backup restored");
        Ok(())
    }
}

fn remove_tree(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove directory");
    }
}

/// Moves a finished partial archive to `path`, failing with `AlreadyExists`
/// instead of replacing an archive that is already there. The partial is
/// removed whatever the outcome.
fn publish_archive(partial: &Path, path: &Path) -> io::Result<()> {
    let linked = fs::hard_link(partial, path);
    discard_partial(partial);
    linked
}

fn discard_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        debug!(path = %partial.display(), error = %e, "Failed to remove partial archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn store_with_world() -> (TempDir, BackupStore) {
        let dir = tempfile::tempdir().unwrap();
        let world = dir.path().join("world");
        fs::create_dir_all(world.join("region")).unwrap();
        fs::write(world.join("level.dat"), b"original").unwrap();
        fs::write(world.join("region").join("r.0.0.mca"), b"chunks").unwrap();
        let store = BackupStore::new(BackupSettings::new(world, dir.path().join("backups")));
        (dir, store)
    }

    #[test]
    fn test_create_and_list() {
        let (_dir, store) = store_with_world();
        let record = store.create_at(Origin::Auto, base_time()).unwrap();

        assert_eq!(record.name, "world_backup_20250301_120000.zip");
        assert!(record.size_bytes > 0);

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[test]
    fn test_missing_world_is_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(BackupSettings::new(
            dir.path().join("absent"),
            dir.path().join("backups"),
        ));
        assert!(matches!(
            store.create(Origin::Manual),
            Err(Error::SourceMissing { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_same_second_is_name_collision() {
        let (_dir, store) = store_with_world();
        store.create_at(Origin::Auto, base_time()).unwrap();
        let err = store.create_at(Origin::Manual, base_time()).unwrap_err();
        assert!(err.is_name_collision());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_created_record_matches_listing() {
        let (_dir, store) = store_with_world();
        let with_nanos = base_time() + Duration::nanoseconds(123_456_789);
        let record = store.create_at(Origin::Manual, with_nanos).unwrap();
        assert_eq!(record.created_at, base_time());

        let fresh = store.create(Origin::Manual).unwrap();
        assert_eq!(store.list().unwrap().last(), Some(&fresh));
        assert_eq!(store.find(&fresh.name).unwrap(), fresh);
    }

    #[test]
    fn test_publish_never_replaces_existing_archive() {
        let (_dir, store) = store_with_world();
        let existing = store.create_at(Origin::Auto, base_time()).unwrap();
        let before = fs::read(&existing.path).unwrap();

        let partial = store.backup_dir().join(format!(".{}.partial", existing.name));
        fs::write(&partial, b"a racing writer").unwrap();
        let err = publish_archive(&partial, &existing.path).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&existing.path).unwrap(), before);
        assert!(!partial.exists());
        assert_eq!(store.list().unwrap(), vec![existing]);
    }

    #[test]
    fn test_twelve_backups_retain_ten() {
        let (_dir, store) = store_with_world();
        for i in 0..12 {
            store
                .create_at(Origin::Auto, base_time() + Duration::seconds(i))
                .unwrap();
        }

        let deleted = store.enforce_retention(10).unwrap();
        assert_eq!(deleted.len(), 2);

        let kept = store.list().unwrap();
        assert_eq!(kept.len(), 10);
        let newest_deleted = deleted.iter().map(|r| r.created_at).max().unwrap();
        assert!(kept.iter().all(|r| r.created_at > newest_deleted));
        assert_eq!(deleted[0].created_at, base_time());
    }

    #[test]
    fn test_retention_floor_requires_confirmation() {
        let (_dir, store) = store_with_world();
        for i in 0..4 {
            store
                .create_at(Origin::Auto, base_time() + Duration::seconds(i))
                .unwrap();
        }

        assert!(matches!(
            store.enforce_retention(2),
            Err(Error::RetentionBelowFloor {
                requested: 2,
                floor: 5
            })
        ));
        assert_eq!(store.list().unwrap().len(), 4);

        let deleted = store.enforce_retention_confirmed(2).unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_list_ignores_partial_and_foreign_files() {
        let (_dir, store) = store_with_world();
        store.create_at(Origin::Auto, base_time()).unwrap();
        fs::write(
            store.backup_dir().join(".world_backup_20250301_120001.zip.partial"),
            b"half",
        )
        .unwrap();
        fs::write(store.backup_dir().join("notes.txt"), b"n").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.enforce_retention_confirmed(0).unwrap().len() == 1);
        assert!(
            store
                .backup_dir()
                .join(".world_backup_20250301_120001.zip.partial")
                .exists()
        );
    }

    #[test]
    fn test_origin_survives_listing() {
        let (_dir, store) = store_with_world();
        store.create_at(Origin::Auto, base_time()).unwrap();
        store
            .create_at(Origin::Manual, base_time() + Duration::seconds(1))
            .unwrap();

        let origins: Vec<_> = store.list().unwrap().iter().map(|r| r.origin).collect();
        assert_eq!(origins, vec![Origin::Auto, Origin::Manual]);
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let (_dir, store) = store_with_world();
        let record = store.create_at(Origin::Manual, base_time()).unwrap();
        store.delete(&record).unwrap();
        assert!(matches!(store.delete(&record), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_find_and_stats() {
        let (_dir, store) = store_with_world();
        let a = store.create_at(Origin::Auto, base_time()).unwrap();
        let b = store
            .create_at(Origin::Auto, base_time() + Duration::seconds(1))
            .unwrap();

        assert_eq!(store.find(&a.name).unwrap(), a);
        assert!(matches!(store.find("nope.zip"), Err(Error::NotFound { .. })));

        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_bytes, a.size_bytes + b.size_bytes);
    }

    #[test]
    fn test_restore_replaces_world() {
        let (_dir, store) = store_with_world();
        let record = store.create_at(Origin::Manual, base_time()).unwrap();

        let world = store.world_dir().to_path_buf();
        fs::write(world.join("level.dat"), b"modified").unwrap();
        fs::write(world.join("stray.txt"), b"new file").unwrap();

        store.restore_into(&record, &world).unwrap();

        assert_eq!(fs::read(world.join("level.dat")).unwrap(), b"original");
        assert_eq!(
            fs::read(world.join("region").join("r.0.0.mca")).unwrap(),
            b"chunks"
        );
        assert!(!world.join("stray.txt").exists());

        let leftovers: Vec<_> = fs::read_dir(world.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_restore_leaves_world_untouched() {
        let (_dir, store) = store_with_world();
        fs::create_dir_all(store.backup_dir()).unwrap();
        let name = archive_name(DEFAULT_BACKUP_PREFIX, base_time());
        fs::write(store.backup_dir().join(&name), b"truncated garbage").unwrap();
        let record = store.find(&name).unwrap();

        let world = store.world_dir().to_path_buf();
        let err = store.restore_into(&record, &world).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert_eq!(fs::read(world.join("level.dat")).unwrap(), b"original");
    }

    #[test]
    fn test_restore_into_missing_target() {
        let (dir, store) = store_with_world();
        let record = store.create_at(Origin::Manual, base_time()).unwrap();

        let target = dir.path().join("fresh").join("world");
        store.restore_into(&record, &target).unwrap();
        assert_eq!(fs::read(target.join("level.dat")).unwrap(), b"original");
    }
}
