//! Guarded restore.
//!
//! A restore holds the supervisor's exclusive guard for its whole sequence:
//! stop the server if it runs, snapshot the current world, extract the
//! selected backup over it, start the server again if it was running. No
//! command, transition or scheduled backup can interleave.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::store::BackupStore;
use super::types::{BackupRecord, Origin};
use crate::error::{Error, Result};
use crate::metrics;
use crate::supervisor::{Lifecycle, ProcessState, StartOutcome, StopOutcome, Supervisor};

/// What a successful restore did.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// The backup that was restored.
    pub restored: BackupRecord,
    /// Snapshot of the world taken just before it was overwritten.
    pub pre_restore: BackupRecord,
    /// Present when the server had to be stopped first.
    pub stopped: Option<StopOutcome>,
    /// Present when the server was started again afterwards.
    pub restarted: Option<StartOutcome>,
}

/// Runs restores against a store while holding the supervisor exclusively.
#[derive(Debug, Clone)]
pub struct BackupCoordinator {
    store: Arc<BackupStore>,
    supervisor: Arc<Supervisor>,
}

impl BackupCoordinator {
    pub const fn new(store: Arc<BackupStore>, supervisor: Arc<Supervisor>) -> Self {
        Self { store, supervisor }
    }

    pub const fn store(&self) -> &Arc<BackupStore> {
        &self.store
    }

    /// Creates a manual backup under the shared guard.
    ///
    /// A same-second name collision is retried once on the next second.
    pub async fn backup_now(&self) -> Result<BackupRecord> {
        let _shared = self.supervisor.shared().await;
        create_snapshot(&self.store).await
    }

    /// Enforces retention under the shared guard.
    ///
    /// Without `confirmed`, a `keep` below the store's floor is refused.
    pub async fn prune(&self, keep: usize, confirmed: bool) -> Result<Vec<BackupRecord>> {
        let _shared = self.supervisor.shared().await;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            if confirmed {
                store.enforce_retention_confirmed(keep)
            } else {
                store.enforce_retention(keep)
            }
        })
        .await?
    }

    /// Restores the backup called `name`.
    pub async fn restore_named(&self, name: &str) -> Result<RestoreReport> {
        let store = Arc::clone(&self.store);
        let name_owned = name.to_string();
        let record = tokio::task::spawn_blocking(move || store.find(&name_owned)).await??;
        self.restore(&record).await
    }

    /// Restores `record` into the world directory.
    pub async fn restore(&self, record: &BackupRecord) -> Result<RestoreReport> {
        let mut guard = self.supervisor.exclusive().await;
        let result = restore_with(&mut guard, &self.store, record).await;
        metrics::record_restore(match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        });
        result
    }
}

/// The restore sequence against any [`Lifecycle`].
pub(crate) async fn restore_with<L: Lifecycle>(
    lifecycle: &mut L,
    store: &Arc<BackupStore>,
    record: &BackupRecord,
) -> Result<RestoreReport> {
    let was_running = lifecycle.state() == ProcessState::Running;
    info!(backup = %record.name, was_running = was_running, "Restoring backup");

    let stopped = if was_running {
        match lifecycle.stop().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(backup = %record.name, error = %e, "Restore aborted: server did not stop");
                return Err(e);
            },
        }
    } else {
        None
    };

    let pre_restore = create_snapshot(store)
        .await
        .map_err(|e| Error::PreSnapshotFailed {
            source: Box::new(e),
        })?;
    info!(snapshot = %pre_restore.name, "Current world saved before restore");

    let target = store.world_dir().to_path_buf();
    let restore_store = Arc::clone(store);
    let restore_record = record.clone();
    let restored = tokio::task::spawn_blocking(move || {
        restore_store.restore_into(&restore_record, &target)
    })
    .await
    .map_err(Error::from)
    .and_then(|result| result);
    if let Err(e) = restored {
        error!(backup = %record.name, snapshot = %pre_restore.name, error = %e, "Restore failed");
        return Err(Error::RestoreFailed {
            pre_restore: pre_restore.name,
            source: Box::new(e),
        });
    }

    let restarted = if was_running {
        match lifecycle.start().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(backup = %record.name, error = %e, "Restore completed but server did not start");
                return Err(Error::RestartFailed {
                    pre_restore: pre_restore.name,
                    source: Box::new(e),
                });
            },
        }
    } else {
        None
    };

    Ok(RestoreReport {
        restored: record.clone(),
        pre_restore,
        stopped,
        restarted,
    })
}

/// Creates a manual archive, retrying once after a same-second collision.
async fn create_snapshot(store: &Arc<BackupStore>) -> Result<BackupRecord> {
    match create_blocking(store).await {
        Err(e) if e.is_name_collision() => {
            tokio::time::sleep(until_next_second()).await;
            create_blocking(store).await
        },
        other => other,
    }
}

async fn create_blocking(store: &Arc<BackupStore>) -> Result<BackupRecord> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.create(Origin::Manual)).await?
}

fn until_next_second() -> Duration {
    let nanos = chrono::Local::now().timestamp_subsec_nanos();
    // Leap-second nanos can exceed one second.
    Duration::from_nanos(u64::from(1_000_000_000u32.saturating_sub(nanos))) + Duration::from_millis(10)
}
