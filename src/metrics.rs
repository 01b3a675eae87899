//! Prometheus metrics for the supervisor and backup pipeline.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus exporter.
//!
//! # Metrics Exposed
//!
//! ## Lifecycle
//! - `warden_state_transitions_total` - Transitions into a state (labels: state)
//! - `warden_forced_stops_total` - Stops that needed a kill
//!
//! ## Backups
//! - `warden_backups_total` - Archive creations (labels: origin, success)
//! - `warden_backup_duration_seconds` - Archive creation time (labels: origin)
//! - `warden_backups_pruned_total` - Archives removed by retention
//! - `warden_restores_total` - Guarded restores (labels: outcome)

use ::metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::backup::Origin;
use crate::error::{Error, Result};
use crate::supervisor::ProcessState;

/// Installs the Prometheus exporter with an HTTP listener on `addr`.
///
/// Does nothing when `addr` is `None`. Must be called from within a tokio
/// runtime.
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config(format!("failed to install metrics exporter: {e}")))?;

    register_metrics();
    tracing::info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "warden_state_transitions_total",
        "Supervisor transitions into each state"
    );
    describe_counter!(
        "warden_forced_stops_total",
        "Stops that escalated to a forced kill"
    );
    describe_counter!("warden_backups_total", "Backup archive creations");
    describe_histogram!(
        "warden_backup_duration_seconds",
        "Backup archive creation time in seconds"
    );
    describe_counter!(
        "warden_backups_pruned_total",
        "Backup archives deleted by retention"
    );
    describe_counter!("warden_restores_total", "Guarded restore attempts");
}

/// Records a supervisor state transition.
pub fn record_transition(state: ProcessState) {
    counter!("warden_state_transitions_total", "state" => state.as_str()).increment(1);
}

/// Records a forced stop.
pub fn record_forced_stop() {
    counter!("warden_forced_stops_total").increment(1);
}

/// Records a backup creation attempt.
pub fn record_backup(origin: Origin, success: bool, duration_secs: f64) {
    counter!(
        "warden_backups_total",
        "origin" => origin.as_str(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
    if success {
        histogram!("warden_backup_duration_seconds", "origin" => origin.as_str())
            .record(duration_secs);
    }
}

/// Records archives deleted by retention.
pub fn record_pruned(count: usize) {
    counter!("warden_backups_pruned_total").increment(count as u64);
}

/// Records a restore outcome (`ok` or an error kind).
pub fn record_restore(outcome: &'static str) {
    counter!("warden_restores_total", "outcome" => outcome).increment(1);
}
