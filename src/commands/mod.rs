pub mod backup;
pub mod run;

use std::sync::Arc;

use warden::backup::{BackupCoordinator, BackupRecord, BackupStore};
use warden::config::WardenConfig;
use warden::supervisor::Supervisor;
use warden::utils::format_bytes;

/// The core objects every command works with.
pub struct Runtime {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<BackupStore>,
    pub coordinator: BackupCoordinator,
}

impl Runtime {
    pub fn new(config: &WardenConfig) -> Self {
        let supervisor = Supervisor::new(config.supervisor_config());
        let store = Arc::new(BackupStore::new(config.backup_settings()));
        let coordinator = BackupCoordinator::new(Arc::clone(&store), Arc::clone(&supervisor));
        Self {
            supervisor,
            store,
            coordinator,
        }
    }
}

/// Prints backups as a table, oldest first.
pub fn print_records(records: &[BackupRecord]) {
    if records.is_empty() {
        println!("No backups found.");
        return;
    }

    println!("{:<36} {:<20} {:>10}  ORIGIN", "NAME", "CREATED", "SIZE");
    println!("{}", "─".repeat(76));
    for record in records {
        println!(
            "{:<36} {:<20} {:>10}  {}",
            record.name,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(record.size_bytes),
            record.origin
        );
    }

    let total: u64 = records.iter().map(|r| r.size_bytes).sum();
    println!("\n{} backups, {} total", records.len(), format_bytes(total));
}

/// Prints a core error with its stable kind.
pub fn print_error(action: &str, error: &warden::error::Error) {
    eprintln!("{action} failed [{}]: {error}", error.kind());
}
