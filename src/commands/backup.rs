//! `warden backup ...`: offline backup management.
//!
//! These commands do not talk to a running `warden run`; they operate on the
//! backup directory directly and never start the server. Restoring while
//! another warden runs the server overwrites a live world.

use anyhow::{Context, Result, bail};
use warden::backup::Origin;
use warden::config::WardenConfig;
use warden::error::Error;
use warden::utils::format_bytes;

use super::{Runtime, print_records};
use crate::BackupAction;

pub async fn execute(config: &WardenConfig, action: BackupAction) -> Result<()> {
    let runtime = Runtime::new(config);
    let store = runtime.store.clone();

    match action {
        BackupAction::List => {
            let records = tokio::task::spawn_blocking(move || store.list()).await??;
            print_records(&records);
        },
        BackupAction::Create => {
            let record = runtime.coordinator.backup_now().await?;
            println!(
                "Created {} ({})",
                record.name,
                format_bytes(record.size_bytes)
            );
        },
        BackupAction::Delete { name } => {
            tokio::task::spawn_blocking(move || {
                let record = store.find(&name)?;
                store.delete(&record)
            })
            .await??;
            println!("Deleted.");
        },
        BackupAction::Prune { keep, yes } => match runtime.coordinator.prune(keep, yes).await {
            Ok(deleted) => {
                for record in &deleted {
                    println!("Deleted {}", record.name);
                }
                println!("{} deleted, {keep} kept at most", deleted.len());
            },
            Err(Error::RetentionBelowFloor { requested, floor }) => {
                bail!(
                    "Refusing to keep only {requested} backups (floor is {floor}). \
                     Re-run with --yes to confirm."
                );
            },
            Err(e) => return Err(e.into()),
        },
        BackupAction::Restore { name } => {
            let report = runtime
                .coordinator
                .restore_named(&name)
                .await
                .with_context(|| format!("Restoring {name}"))?;
            println!("Restored {}", report.restored.name);
            println!("Previous world saved as {}", report.pre_restore.name);
        },
        BackupAction::Stats => {
            let records = tokio::task::spawn_blocking(move || store.list()).await??;
            let total: u64 = records.iter().map(|r| r.size_bytes).sum();
            let auto = records.iter().filter(|r| r.origin == Origin::Auto).count();
            println!("Backups:  {} ({} auto, {} manual)", records.len(), auto, records.len() - auto);
            println!("Size:     {}", format_bytes(total));
            if let (Some(oldest), Some(newest)) = (records.first(), records.last()) {
                println!("Oldest:   {}", oldest.name);
                println!("Newest:   {}", newest.name);
            }
            println!("Location: {}", runtime.store.backup_dir().display());
        },
    }
    Ok(())
}
