//! Periodic automatic backups.
//!
//! Each run takes a shared guard on the supervisor, creates an `Auto`
//! archive and enforces retention. The shared guard means a run never
//! overlaps a start, stop or restore, while commands keep flowing. Runs do
//! not look at the server state: a backup taken while the server is writing
//! is only as consistent as the files on disk at that moment.
//!
//! A failed run is logged and recorded; the schedule keeps going.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::store::BackupStore;
use super::types::{BackupRecord, Origin};
use crate::constants::{DEFAULT_BACKUP_INTERVAL_SECS, DEFAULT_RETENTION, MAX_RUN_HISTORY};
use crate::supervisor::Supervisor;

/// When and how much to back up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Fixed interval between runs.
    pub interval: Duration,
    /// 7-field cron expression (UTC); replaces `interval` when set.
    pub cron: Option<String>,
    /// Archives kept after each run.
    pub retention: usize,
    /// When false no job is registered; `trigger_now` still works.
    pub enabled: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_BACKUP_INTERVAL_SECS),
            cron: None,
            retention: DEFAULT_RETENTION,
            enabled: true,
        }
    }
}

/// Outcome of one scheduled or manual run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRun {
    /// Unique run ID.
    pub id: String,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
    pub success: bool,
    /// Name of the archive created, if any.
    pub backup: Option<String>,
    /// Archives removed by retention.
    pub pruned: usize,
    pub error: Option<String>,
    /// Whether this run came from `trigger_now`.
    pub manual: bool,
}

/// Counters over all runs since the scheduler was created.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_run: Option<BackupRun>,
}

#[derive(Default)]
struct RunLog {
    history: VecDeque<BackupRun>,
    run_count: u64,
    success_count: u64,
    failure_count: u64,
}

impl RunLog {
    fn record(&mut self, run: BackupRun) {
        self.run_count += 1;
        if run.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        if self.history.len() >= MAX_RUN_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(run);
    }
}

struct Runner {
    store: Arc<BackupStore>,
    supervisor: Arc<Supervisor>,
    retention: usize,
    log: Mutex<RunLog>,
}

impl Runner {
    async fn run(&self, manual: bool) -> BackupRun {
        let id = Uuid::new_v4().to_string();
        let started_at = Local::now();
        let start = Instant::now();

        let result = self.create_and_prune().await;
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        let run = match result {
            Ok((record, pruned)) => {
                tracing::info!(
                    backup = %record.name,
                    pruned = pruned.len(),
                    duration_ms = duration_ms,
                    manual = manual,
                    "Automatic backup completed"
                );
                BackupRun {
                    id,
                    started_at,
                    duration_ms,
                    success: true,
                    backup: Some(record.name),
                    pruned: pruned.len(),
                    error: None,
                    manual,
                }
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    kind = e.kind(),
                    manual = manual,
                    "Automatic backup failed"
                );
                BackupRun {
                    id,
                    started_at,
                    duration_ms,
                    success: false,
                    backup: None,
                    pruned: 0,
                    error: Some(e.to_string()),
                    manual,
                }
            },
        };

        self.log.lock().record(run.clone());
        run
    }

    async fn create_and_prune(&self) -> crate::error::Result<(BackupRecord, Vec<BackupRecord>)> {
        let _shared = self.supervisor.shared().await;
        let store = Arc::clone(&self.store);
        let retention = self.retention;
        tokio::task::spawn_blocking(move || {
            let record = store.create(Origin::Auto)?;
            let pruned = store.enforce_retention(retention)?;
            Ok((record, pruned))
        })
        .await?
    }
}

/// Runs automatic backups on an interval or cron schedule.
pub struct BackupScheduler {
    scheduler: JobScheduler,
    runner: Arc<Runner>,
    job_id: Option<Uuid>,
}

impl BackupScheduler {
    /// Creates the scheduler and registers the backup job (if enabled).
    ///
    /// Nothing runs until [`Self::start`].
    pub async fn new(
        store: Arc<BackupStore>,
        supervisor: Arc<Supervisor>,
        settings: ScheduleSettings,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        let runner = Arc::new(Runner {
            store,
            supervisor,
            retention: settings.retention,
            log: Mutex::new(RunLog::default()),
        });

        let job_id = if settings.enabled {
            let job = Self::build_job(&runner, &settings)?;
            Some(
                scheduler
                    .add(job)
                    .await
                    .context("Failed to add backup job to scheduler")?,
            )
        } else {
            tracing::info!("Automatic backups disabled");
            None
        };

        Ok(Self {
            scheduler,
            runner,
            job_id,
        })
    }

    fn build_job(runner: &Arc<Runner>, settings: &ScheduleSettings) -> Result<Job> {
        let runner = Arc::clone(runner);
        let run = move |_uuid: Uuid, _lock: JobScheduler| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            let runner = Arc::clone(&runner);
            Box::pin(async move {
                runner.run(false).await;
            })
        };

        match &settings.cron {
            Some(cron) => {
                let job = Job::new_async(cron.as_str(), run)
                    .with_context(|| format!("Invalid cron expression: {cron}"))?;
                tracing::info!(cron = %cron, retention = settings.retention, "Backup job scheduled");
                Ok(job)
            },
            None => {
                let job = Job::new_repeated_async(settings.interval, run)
                    .context("Failed to create repeated backup job")?;
                tracing::info!(
                    interval_secs = settings.interval.as_secs(),
                    retention = settings.retention,
                    "Backup job scheduled"
                );
                Ok(job)
            },
        }
    }

    /// Starts firing scheduled runs.
    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .context("Failed to start scheduler")?;
        tracing::info!("Backup scheduler started");
        Ok(())
    }

    /// Stops the scheduler. A run in progress is not interrupted.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(job_id) = self.job_id.take() {
            self.scheduler
                .remove(&job_id)
                .await
                .context("Failed to remove backup job")?;
        }
        self.scheduler
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        tracing::info!("Backup scheduler stopped");
        Ok(())
    }

    /// Whether a periodic job is registered.
    pub const fn is_scheduled(&self) -> bool {
        self.job_id.is_some()
    }

    /// Runs one backup immediately, outside the schedule.
    pub async fn trigger_now(&self) -> BackupRun {
        self.runner.run(true).await
    }

    /// Most recent runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<BackupRun> {
        let log = self.runner.log.lock();
        log.history
            .iter()
            .rev()
            .take(limit.min(MAX_RUN_HISTORY))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        let log = self.runner.log.lock();
        SchedulerStats {
            run_count: log.run_count,
            success_count: log.success_count,
            failure_count: log.failure_count,
            last_run: log.history.back().cloned(),
        }
    }
}
