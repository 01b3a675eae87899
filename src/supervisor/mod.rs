//! Supervision of the wrapped server process.
//!
//! [`Supervisor`] owns at most one child process and drives it through the
//! [`ProcessState`] machine:
//!
//! ```text
//! Stopped --start--> Starting --ready/timeout--> Running --stop--> Stopping --exit/kill--> Stopped
//! ```
//!
//! ## Locking
//!
//! The active process lives behind a single `RwLock`. State-changing calls
//! (`start`, `stop`, `restart`, and restores through
//! [`crate::backup::BackupCoordinator`]) hold the write side for their whole
//! duration via an [`ExclusiveGuard`]. Commands, status queries and
//! scheduled backups hold the read side via a [`SharedGuard`], so they run
//! concurrently with each other but never interleave with a transition.
//!
//! The current state is also published on a `watch` channel, so
//! [`Supervisor::state`] never blocks and always returns one of the four
//! states, including the transient `Starting` and `Stopping`. Those two are
//! only visible while an [`ExclusiveGuard`] is held: dropping the guard
//! (including by cancelling a `start` or `stop` future) settles the state to
//! `Running` or `Stopped` according to whether a process is still owned.
//!
//! ## Module Structure
//!
//! - [`handle`]: child process ownership and console streams
//! - [`capture`]: background output capture and readiness probe
//! - [`output`]: bounded console history
//! - [`roster`]: advisory player-list scan
//! - [`usage`]: CPU and memory sampling

pub mod capture;
pub mod handle;
pub mod output;
pub mod roster;
pub mod state;
pub mod usage;

pub use capture::ReadinessProbe;
pub use handle::{LaunchSpec, OutputSource, ProcessHandle};
pub use output::{OutputBuffer, OutputLine};
pub use state::ProcessState;
pub use usage::ResourceUsage;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_KILL_GRACE_SECS, DEFAULT_OUTPUT_CAPACITY,
    DEFAULT_READY_TIMEOUT_SECS, DEFAULT_READY_TOKENS, DEFAULT_RESTART_DELAY_MS,
    DEFAULT_STOP_COMMAND, DEFAULT_STOP_TIMEOUT_SECS, EXIT_REAP_TIMEOUT_MS, OUTPUT_DRAIN_TIMEOUT_MS,
    ROSTER_REPLY_DELAY_MS, ROSTER_SCAN_LINES,
};
use crate::error::{Error, Result};
use crate::metrics;
use capture::{CaptureSignals, spawn_capture};

/// Capacity of the transition broadcast channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How to launch the server.
    pub launch: LaunchSpec,
    /// Console command requesting a graceful shutdown.
    pub stop_command: String,
    /// How long to wait for a graceful exit before killing.
    pub stop_timeout: Duration,
    /// How long to wait for the process to be reaped after a kill.
    pub kill_grace: Duration,
    /// Readiness heuristic applied while `Starting`.
    pub readiness: ReadinessProbe,
    /// Pause between the stop and start halves of a restart.
    pub restart_delay: Duration,
    /// Console lines kept in memory.
    pub output_capacity: usize,
    /// How long a console write may block before the channel is abandoned.
    pub command_timeout: Duration,
}

impl SupervisorConfig {
    /// Creates a configuration with default timeouts for `launch`.
    pub fn new(launch: LaunchSpec) -> Self {
        Self {
            launch,
            stop_command: DEFAULT_STOP_COMMAND.to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECS),
            readiness: ReadinessProbe::new(
                DEFAULT_READY_TOKENS,
                Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            ),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    /// Set the graceful stop timeout.
    #[must_use]
    pub const fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the post-kill grace period.
    #[must_use]
    pub const fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set the readiness probe.
    #[must_use]
    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }

    /// Set the restart quiescence delay.
    #[must_use]
    pub const fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Set the console history capacity.
    #[must_use]
    pub const fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Set the console write timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the graceful stop command.
    #[must_use]
    pub fn stop_command(mut self, command: impl Into<String>) -> Self {
        self.stop_command = command.into();
        self
    }
}

/// How the `Starting -> Running` transition was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// The readiness sentinel was seen.
    Confirmed,
    /// The window elapsed (or no probe is configured); running is assumed.
    Assumed,
}

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// OS process id.
    pub pid: u32,
    /// Whether readiness was observed or assumed.
    pub readiness: Readiness,
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited after the stop command.
    Graceful {
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
    },
    /// The process ignored the stop command and was killed.
    Forced,
}

impl StopOutcome {
    /// True when the stop needed a forced kill.
    pub const fn was_forced(self) -> bool {
        matches!(self, Self::Forced)
    }
}

/// Snapshot of the supervised process.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Current lifecycle state.
    pub state: ProcessState,
    /// OS process id while a process exists.
    pub pid: Option<u32>,
    /// Launch time while a process exists.
    pub started_at: Option<DateTime<Local>>,
    /// Time since launch while a process exists.
    pub uptime: Option<Duration>,
}

struct Active {
    handle: ProcessHandle,
    capture: JoinHandle<()>,
    generation: u64,
}

/// Owner of the wrapped server process.
pub struct Supervisor {
    config: SupervisorConfig,
    output: Arc<OutputBuffer>,
    slot: RwLock<Option<Active>>,
    state: watch::Sender<ProcessState>,
    transitions: broadcast::Sender<ProcessState>,
    generation: AtomicU64,
    this: Weak<Supervisor>,
}

impl Supervisor {
    /// Creates a stopped supervisor.
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let output = Arc::new(OutputBuffer::new(config.output_capacity));
        let (state, _) = watch::channel(ProcessState::Stopped);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);

        Arc::new_cyclic(|this| Self {
            config,
            output,
            slot: RwLock::new(None),
            state,
            transitions,
            generation: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Supervisor configuration.
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current state. Never blocks.
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Watches the current state.
    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Receives every state transition from now on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessState> {
        self.transitions.subscribe()
    }

    /// Console history of the current and previous processes.
    pub const fn output(&self) -> &Arc<OutputBuffer> {
        &self.output
    }

    /// Acquires exclusive control for a sequence of transitions.
    pub async fn exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard {
            supervisor: self,
            slot: self.slot.write().await,
        }
    }

    /// Acquires shared access: no transition can run while it is held.
    pub async fn shared(&self) -> SharedGuard<'_> {
        SharedGuard {
            supervisor: self,
            slot: self.slot.read().await,
        }
    }

    /// Starts the server. Fails with `AlreadyRunning` unless stopped.
    pub async fn start(&self) -> Result<StartOutcome> {
        self.exclusive().await.start().await
    }

    /// Stops the server, escalating to a kill after the stop timeout.
    pub async fn stop(&self) -> Result<StopOutcome> {
        self.exclusive().await.stop().await
    }

    /// Stops, waits the quiescence delay, then starts.
    pub async fn restart(&self) -> Result<StartOutcome> {
        self.exclusive().await.restart().await
    }

    /// Writes a console command. Fails with `NotRunning` unless running.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        self.shared().await.send_command(text).await
    }

    /// State, pid and uptime of the supervised process.
    pub async fn status(&self) -> StatusReport {
        let guard = self.shared().await;
        let active = guard.slot.as_ref();
        StatusReport {
            state: guard.state(),
            pid: active.map(|a| a.handle.pid()),
            started_at: active.map(|a| a.handle.started_at()),
            uptime: active.map(|a| a.handle.uptime()),
        }
    }

    /// CPU and memory of the running process, if any.
    pub async fn resource_usage(&self) -> Option<ResourceUsage> {
        let pid = self.status().await.pid?;
        usage::sample(pid).await
    }

    /// Asks the server for its player list and scans the reply.
    ///
    /// Advisory: `Ok(None)` means no recognisable reply arrived in time.
    pub async fn online_players(&self) -> Result<Option<Vec<String>>> {
        self.send_command("list").await?;
        tokio::time::sleep(Duration::from_millis(ROSTER_REPLY_DELAY_MS)).await;
        Ok(roster::online_players(
            &self.output.snapshot(ROSTER_SCAN_LINES),
        ))
    }

    fn publish(&self, state: ProcessState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "State transition");
            metrics::record_transition(state);
            // No subscribers is not an error.
            let _ = self.transitions.send(state);
        }
    }

    /// Reaps a process whose console stream ended without a stop request.
    async fn reap_if_exited(&self, generation: u64) {
        let mut slot = self.slot.write().await;
        let Some(active) = slot.as_mut().filter(|a| a.generation == generation) else {
            return;
        };

        let pid = active.handle.pid();
        match active
            .handle
            .wait_timeout(Duration::from_millis(EXIT_REAP_TIMEOUT_MS))
            .await
        {
            Ok(Some(status)) => {
                tracing::warn!(pid = pid, status = %status, "Server exited unexpectedly");
                slot.take();
                self.publish(ProcessState::Stopped);
            },
            Ok(None) => {
                tracing::debug!(pid = pid, "Console closed but process still alive");
            },
            Err(e) => {
                tracing::warn!(pid = pid, error = %e, "Failed to reap server process");
            },
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("program", &self.config.launch.program)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive control over the supervisor's state machine.
pub struct ExclusiveGuard<'a> {
    supervisor: &'a Supervisor,
    slot: RwLockWriteGuard<'a, Option<Active>>,
}

impl ExclusiveGuard<'_> {
    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.supervisor.state()
    }

    /// `Stopped -> Starting -> Running`.
    pub async fn start(&mut self) -> Result<StartOutcome> {
        let sup = self.supervisor;
        if self.slot.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let config = &sup.config;
        let (handle, source) = ProcessHandle::launch(&config.launch)?;
        let pid = handle.pid();
        let generation = sup.generation.fetch_add(1, Ordering::Relaxed) + 1;
        sup.publish(ProcessState::Starting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let this = sup.this.clone();
        let signals = CaptureSignals {
            ready: Some(ready_tx),
            on_end: Box::new(move || {
                if let Some(sup) = this.upgrade() {
                    tokio::spawn(async move { sup.reap_if_exited(generation).await });
                }
            }),
        };
        let capture = spawn_capture(
            source,
            Arc::clone(&sup.output),
            config.readiness.clone(),
            pid,
            signals,
        );
        *self.slot = Some(Active {
            handle,
            capture,
            generation,
        });

        let readiness = if config.readiness.is_disabled() {
            Readiness::Assumed
        } else {
            match tokio::time::timeout(config.readiness.timeout, ready_rx).await {
                Ok(Ok(())) => Readiness::Confirmed,
                Ok(Err(_)) => {
                    // Console closed before the sentinel: find out whether
                    // the process actually died.
                    if let Some(status) = self.take_if_exited().await {
                        return Err(Error::launch(
                            &config.launch.program,
                            io::Error::other(format!("exited during startup ({status})")),
                        ));
                    }
                    Readiness::Assumed
                },
                Err(_) => {
                    tracing::warn!(
                        pid = pid,
                        timeout_secs = config.readiness.timeout.as_secs(),
                        "Readiness sentinel not seen, assuming server is running"
                    );
                    Readiness::Assumed
                },
            }
        };

        sup.publish(ProcessState::Running);
        tracing::info!(pid = pid, readiness = ?readiness, "Server running");
        Ok(StartOutcome { pid, readiness })
    }

    /// `Running -> Stopping -> Stopped`, killing the process if it ignores
    /// the stop command.
    pub async fn stop(&mut self) -> Result<StopOutcome> {
        let sup = self.supervisor;
        let config = &sup.config;
        let Some(active) = self.slot.as_mut() else {
            return Err(Error::NotRunning);
        };

        let pid = active.handle.pid();
        sup.publish(ProcessState::Stopping);
        tracing::info!(pid = pid, "Stopping server");

        // The stop command and the exit wait share one deadline.
        let deadline = tokio::time::Instant::now() + config.stop_timeout;
        if let Err(e) = active
            .handle
            .send_line(&config.stop_command, config.stop_timeout)
            .await
        {
            tracing::debug!(pid = pid, error = %e, "Stop command not delivered");
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let graceful = match active.handle.wait_timeout(remaining).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = pid, error = %e, "Waiting for server exit failed");
                None
            },
        };

        let outcome = if let Some(status) = graceful {
            StopOutcome::Graceful {
                exit_code: status.code(),
            }
        } else {
            tracing::warn!(
                pid = pid,
                timeout_secs = config.stop_timeout.as_secs(),
                "Server did not stop in time, forcing termination"
            );
            if let Err(reason) = force_kill(&mut active.handle, config.kill_grace).await {
                sup.publish(ProcessState::Running);
                return Err(Error::StopFailed { pid, reason });
            }
            metrics::record_forced_stop();
            StopOutcome::Forced
        };

        if let Some(active) = self.slot.take() {
            drain(active.capture).await;
        }
        sup.publish(ProcessState::Stopped);
        tracing::info!(pid = pid, outcome = ?outcome, "Server stopped");
        Ok(outcome)
    }

    /// `stop`, quiescence delay, `start`. Aborts without starting when the
    /// stop fails.
    pub async fn restart(&mut self) -> Result<StartOutcome> {
        self.stop().await?;
        tokio::time::sleep(self.supervisor.config.restart_delay).await;
        self.start().await
    }

    async fn take_if_exited(&mut self) -> Option<ExitStatus> {
        let active = self.slot.as_mut()?;
        let status = active
            .handle
            .wait_timeout(Duration::from_millis(EXIT_REAP_TIMEOUT_MS))
            .await
            .ok()
            .flatten()?;

        tracing::warn!(pid = active.handle.pid(), status = %status, "Server exited during startup");
        if let Some(active) = self.slot.take() {
            drain(active.capture).await;
        }
        self.supervisor.publish(ProcessState::Stopped);
        Some(status)
    }
}

impl Drop for ExclusiveGuard<'_> {
    /// A transition future dropped mid-flight leaves `Starting` or `Stopping`
    /// published. Settle it to whatever the slot actually holds.
    fn drop(&mut self) {
        if matches!(
            self.supervisor.state(),
            ProcessState::Starting | ProcessState::Stopping
        ) {
            let settled = if self.slot.is_some() {
                ProcessState::Running
            } else {
                ProcessState::Stopped
            };
            tracing::debug!(state = %settled, "Settling interrupted transition");
            self.supervisor.publish(settled);
        }
    }
}

/// Shared access: commands and queries, no transitions.
pub struct SharedGuard<'a> {
    supervisor: &'a Supervisor,
    slot: RwLockReadGuard<'a, Option<Active>>,
}

impl SharedGuard<'_> {
    /// Current state (`Running` or `Stopped` while the guard is held).
    pub fn state(&self) -> ProcessState {
        self.supervisor.state()
    }

    /// OS process id of the running server.
    pub fn pid(&self) -> Option<u32> {
        self.slot.as_ref().map(|a| a.handle.pid())
    }

    /// Writes one newline-terminated command and flushes it.
    ///
    /// Does not wait for a reply; observe effects through the output buffer.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        let active = self.slot.as_ref().ok_or(Error::NotRunning)?;
        let command = validate_command(text)?;
        active
            .handle
            .send_line(command, self.supervisor.config.command_timeout)
            .await?;
        tracing::debug!(pid = active.handle.pid(), command = %command, "Sent command");
        Ok(())
    }
}

/// The lifecycle operations a restore needs while holding exclusivity.
#[async_trait]
pub trait Lifecycle: Send {
    /// Current state.
    fn state(&self) -> ProcessState;
    /// Starts the server.
    async fn start(&mut self) -> Result<StartOutcome>;
    /// Stops the server.
    async fn stop(&mut self) -> Result<StopOutcome>;
}

#[async_trait]
impl<'a> Lifecycle for ExclusiveGuard<'a> {
    fn state(&self) -> ProcessState {
        ExclusiveGuard::state(self)
    }

    async fn start(&mut self) -> Result<StartOutcome> {
        ExclusiveGuard::start(self).await
    }

    async fn stop(&mut self) -> Result<StopOutcome> {
        ExclusiveGuard::stop(self).await
    }
}

/// Rejects empty commands and embedded line breaks.
fn validate_command(text: &str) -> Result<&str> {
    let command = text.trim_end_matches(['\r', '\n']);
    if command.trim().is_empty() {
        return Err(Error::InvalidCommand("empty command".to_string()));
    }
    if command.contains(['\r', '\n']) {
        return Err(Error::InvalidCommand(
            "command contains a line break".to_string(),
        ));
    }
    Ok(command)
}

async fn force_kill(
    handle: &mut ProcessHandle,
    grace: Duration,
) -> std::result::Result<(), String> {
    if let Err(e) = handle.kill() {
        // Already exited between the timeout and the kill.
        if let Ok(Some(_)) = handle.try_wait() {
            return Ok(());
        }
        return Err(format!("kill failed: {e}"));
    }
    match handle.wait_timeout(grace).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(format!(
            "process still alive {}s after kill",
            grace.as_secs()
        )),
        Err(e) => Err(format!("wait after kill failed: {e}")),
    }
}

async fn drain(mut capture: JoinHandle<()>) {
    let timeout = Duration::from_millis(OUTPUT_DRAIN_TIMEOUT_MS);
    if tokio::time::timeout(timeout, &mut capture).await.is_err() {
        tracing::debug!("Console capture still open after exit, detaching");
        capture.abort();
    }
}
