//! CPU and memory sampling for the supervised process.

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    /// CPU usage in percent of one core over the sampling window.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
}

/// Samples CPU and memory for `pid`.
///
/// CPU usage needs two refreshes separated by sysinfo's minimum update
/// interval, so this waits roughly 200 ms. Returns `None` when the process
/// no longer exists.
pub async fn sample(pid: u32) -> Option<ResourceUsage> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();

    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid)?;

    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    system.process(pid).map(|process| ResourceUsage {
        cpu_percent: process.cpu_usage(),
        memory_bytes: process.memory(),
    })
}
