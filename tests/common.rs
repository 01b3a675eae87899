//! Common test utilities for integration tests.
//!
//! The fake servers are small `sh` scripts that behave like a game server
//! console: a banner, a readiness line, commands on stdin, `stop` to exit.
//! They need a POSIX shell, so the suites that use them are Unix-only.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use warden::backup::{BackupSettings, BackupStore};
use warden::supervisor::{
    LaunchSpec, ProcessState, ReadinessProbe, Supervisor, SupervisorConfig,
};

// =============================================================================
// Fake servers
// =============================================================================

/// Well-behaved server: readiness line, `list` reply, exits 0 on `stop`.
pub const FAKE_SERVER: &str = r#"
echo "Starting fake server"
echo "Preparing level \"world\""
echo 'Done (0.2s)! For help, type "help"'
while IFS= read -r line; do
  case "$line" in
    stop) echo "Stopping the server"; echo "Saving chunks"; exit 0 ;;
    list) echo "There are 2 of a max of 20 players online: alice, bob" ;;
    warn) echo "something odd" >&2 ;;
    *) echo "echo: $line" ;;
  esac
done
"#;

/// Server that acknowledges `stop` but never exits.
pub const STUBBORN_SERVER: &str = r#"
echo 'Done (0.1s)! For help, type "help"'
while IFS= read -r line; do
  echo "ignoring: $line"
done
"#;

/// Server that becomes ready and never reads its console.
pub const DEAF_SERVER: &str = r#"
echo 'Done (0.1s)! For help, type "help"'
exec sleep 1000
"#;

/// Server that never prints its readiness line.
pub const SILENT_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    stop) exit 0 ;;
  esac
done
"#;

/// Server that dies before becoming ready.
pub const BROKEN_SERVER: &str = r#"
echo "Failed to load eula.txt" >&2
exit 3
"#;

/// Server that becomes ready and then crashes on its own.
pub const CRASHING_SERVER: &str = r#"
echo 'Done (0.1s)! For help, type "help"'
sleep 1
echo "Encountered an unexpected exception"
exit 1
"#;

// =============================================================================
// Fixtures
// =============================================================================

/// A server directory with a small world and an empty backup directory.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let fixture = Self { dir };
        write_world(&fixture.world_dir(), "original");
        fs::create_dir_all(fixture.backup_dir()).expect("backup dir");
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn world_dir(&self) -> PathBuf {
        self.dir.path().join("world")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// Supervisor config running `script` with test-sized timeouts.
    pub fn supervisor_config(&self, script: &str) -> SupervisorConfig {
        test_config(self.root(), script)
    }

    pub fn supervisor(&self, script: &str) -> Arc<Supervisor> {
        Supervisor::new(self.supervisor_config(script))
    }

    pub fn store(&self) -> Arc<BackupStore> {
        Arc::new(BackupStore::new(BackupSettings::new(
            self.world_dir(),
            self.backup_dir(),
        )))
    }
}

/// Builds a config that runs `script` with `sh -c` in `dir`.
pub fn test_config(dir: &Path, script: &str) -> SupervisorConfig {
    let launch = LaunchSpec::new("sh", dir).args(["-c", script]);
    SupervisorConfig::new(launch)
        .stop_timeout(Duration::from_secs(2))
        .kill_grace(Duration::from_secs(2))
        .restart_delay(Duration::from_millis(50))
        .readiness(ReadinessProbe::new(["Done", "help"], Duration::from_secs(5)))
}

/// Writes a recognisable world tree tagged with `marker`.
pub fn write_world(world: &Path, marker: &str) {
    fs::create_dir_all(world.join("region")).expect("world dir");
    fs::write(world.join("level.dat"), format!("level {marker}")).expect("level.dat");
    fs::write(world.join("region/r.0.0.mca"), marker.repeat(64)).expect("region file");
}

/// Reads back the marker written by [`write_world`].
pub fn world_marker(world: &Path) -> String {
    let level = fs::read_to_string(world.join("level.dat")).expect("level.dat");
    level.trim_start_matches("level ").to_string()
}

// =============================================================================
// Waiting helpers
// =============================================================================

/// Polls `check` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Waits until a console line containing `needle` has been captured.
pub async fn wait_for_output(sup: &Supervisor, needle: &str, timeout: Duration) -> bool {
    wait_until(timeout, || {
        sup.output().all().iter().any(|line| line.text.contains(needle))
    })
    .await
}

/// Waits until the published state equals `state`.
pub async fn wait_for_state(sup: &Supervisor, state: ProcessState, timeout: Duration) -> bool {
    let mut rx = sup.watch_state();
    tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
        .await
        .is_ok_and(|r| r.is_ok())
}

/// Collects every transition already queued on `rx`.
pub fn drain_transitions(rx: &mut broadcast::Receiver<ProcessState>) -> Vec<ProcessState> {
    let mut seen = Vec::new();
    while let Ok(state) = rx.try_recv() {
        seen.push(state);
    }
    seen
}
