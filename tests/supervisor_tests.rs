//! Lifecycle tests against fake `sh` servers.
//!
//! Covers the state machine end to end: readiness detection, command
//! injection, graceful and forced stops, startup failures and processes that
//! exit on their own.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common.rs"]
mod common;

use std::time::{Duration, Instant};

use common::*;
use warden::error::Error;
use warden::supervisor::{
    LaunchSpec, ProcessState, Readiness, ReadinessProbe, StopOutcome, Supervisor, SupervisorConfig,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Start / stop
// =============================================================================

#[tokio::test]
async fn test_start_then_graceful_stop() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    let mut transitions = sup.subscribe();

    let started = sup.start().await.unwrap();
    assert_eq!(started.readiness, Readiness::Confirmed);
    assert_eq!(sup.state(), ProcessState::Running);
    assert_eq!(sup.status().await.pid, Some(started.pid));

    let stopped = sup.stop().await.unwrap();
    assert_eq!(stopped, StopOutcome::Graceful { exit_code: Some(0) });
    assert_eq!(sup.state(), ProcessState::Stopped);
    assert_eq!(sup.status().await.pid, None);

    assert_eq!(
        drain_transitions(&mut transitions),
        vec![
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Stopping,
            ProcessState::Stopped,
        ]
    );

    // Output produced while shutting down is captured before stop returns.
    assert!(
        sup.output()
            .all()
            .iter()
            .any(|line| line.text == "Saving chunks")
    );
}

#[tokio::test]
async fn test_start_when_running_keeps_existing_process() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);

    let first = sup.start().await.unwrap();
    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert_eq!(sup.status().await.pid, Some(first.pid));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_starts_launch_one_process() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);

    let (a, b) = tokio::join!(sup.start(), sup.start());
    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyRunning)))
        .count();
    assert_eq!((ok, busy), (1, 1));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_and_restart_when_stopped() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);

    assert!(matches!(sup.stop().await, Err(Error::NotRunning)));
    assert!(matches!(sup.restart().await, Err(Error::NotRunning)));
    assert_eq!(sup.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);

    let first = sup.start().await.unwrap();
    let mut transitions = sup.subscribe();
    let second = sup.restart().await.unwrap();

    assert_ne!(first.pid, second.pid);
    assert_eq!(sup.state(), ProcessState::Running);
    assert_eq!(
        drain_transitions(&mut transitions),
        vec![
            ProcessState::Stopping,
            ProcessState::Stopped,
            ProcessState::Starting,
            ProcessState::Running,
        ]
    );

    sup.stop().await.unwrap();
}

// =============================================================================
// Console
// =============================================================================

#[tokio::test]
async fn test_command_reply_is_captured() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    sup.start().await.unwrap();

    sup.send_command("say hello").await.unwrap();
    assert!(wait_for_output(&sup, "echo: say hello", WAIT).await);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_stderr_is_merged_into_output() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    sup.start().await.unwrap();

    sup.send_command("warn").await.unwrap();
    assert!(wait_for_output(&sup, "something odd", WAIT).await);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_command_when_stopped_is_rejected() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);

    assert!(matches!(
        sup.send_command("say hi").await,
        Err(Error::NotRunning)
    ));
    assert!(sup.output().is_empty());
}

#[tokio::test]
async fn test_multiline_command_is_rejected() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    sup.start().await.unwrap();

    let err = sup.send_command("say a\nstop").await.unwrap_err();
    assert!(matches!(err, Error::InvalidCommand(_)));
    assert_eq!(sup.state(), ProcessState::Running);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_online_players_from_list_reply() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    sup.start().await.unwrap();

    let players = sup.online_players().await.unwrap();
    assert_eq!(players, Some(vec!["alice".to_string(), "bob".to_string()]));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_output_subscription_sees_new_lines() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(FAKE_SERVER);
    sup.start().await.unwrap();

    let mut feed = sup.output().subscribe();
    sup.send_command("ping").await.unwrap();
    let line = tokio::time::timeout(WAIT, feed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.text, "echo: ping");

    sup.stop().await.unwrap();
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn test_stubborn_server_is_killed() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(STUBBORN_SERVER);
    sup.start().await.unwrap();

    let begin = Instant::now();
    let outcome = sup.stop().await.unwrap();
    assert_eq!(outcome, StopOutcome::Forced);
    assert_eq!(sup.state(), ProcessState::Stopped);
    // stop_timeout (2s) + kill_grace (2s) bounds the wait.
    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(wait_for_output(&sup, "ignoring: stop", WAIT).await);
}

#[tokio::test]
async fn test_silent_server_is_assumed_ready() {
    let fixture = Fixture::new();
    let config = fixture.supervisor_config(SILENT_SERVER);
    let config = config.readiness(ReadinessProbe::new(
        ["Done", "help"],
        Duration::from_millis(300),
    ));
    let sup = Supervisor::new(config);

    let started = sup.start().await.unwrap();
    assert_eq!(started.readiness, Readiness::Assumed);
    assert_eq!(sup.state(), ProcessState::Running);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_exit_during_startup_is_launch_error() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(BROKEN_SERVER);

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, Error::Launch { .. }));
    assert_eq!(sup.state(), ProcessState::Stopped);
    assert!(wait_for_output(&sup, "Failed to load eula.txt", WAIT).await);

    // A failed start leaves the supervisor usable.
    assert!(matches!(sup.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn test_missing_program_is_launch_error() {
    let fixture = Fixture::new();
    let launch = LaunchSpec::new("warden-no-such-server", fixture.root());
    let sup = Supervisor::new(SupervisorConfig::new(launch));

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, Error::Launch { .. }));
    assert_eq!(sup.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn test_unexpected_exit_is_reaped() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(CRASHING_SERVER);

    sup.start().await.unwrap();
    assert!(wait_for_state(&sup, ProcessState::Stopped, WAIT).await);
    assert_eq!(sup.status().await.pid, None);
    assert!(wait_for_output(&sup, "unexpected exception", WAIT).await);

    // The supervisor can start again after a crash.
    let again = sup.start().await.unwrap();
    assert_eq!(again.readiness, Readiness::Confirmed);
    assert!(wait_for_state(&sup, ProcessState::Stopped, WAIT).await);
}

#[tokio::test]
async fn test_full_console_pipe_does_not_wedge_stop() {
    let fixture = Fixture::new();
    let config = fixture
        .supervisor_config(DEAF_SERVER)
        .command_timeout(Duration::from_millis(300))
        .stop_timeout(Duration::from_secs(1))
        .kill_grace(Duration::from_secs(1));
    let sup = Supervisor::new(config);
    sup.start().await.unwrap();

    // Nobody reads stdin, so the pipe buffer eventually fills.
    let filler = "x".repeat(4096);
    let mut timed_out = false;
    for _ in 0..64 {
        match sup.send_command(&filler).await {
            Ok(()) => {},
            Err(Error::CommandTimeout { timeout_ms }) => {
                assert_eq!(timeout_ms, 300);
                timed_out = true;
                break;
            },
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert!(timed_out, "console pipe never filled");
    assert_eq!(sup.state(), ProcessState::Running);

    let outcome = tokio::time::timeout(Duration::from_secs(10), sup.stop())
        .await
        .expect("stop hung on the console pipe")
        .unwrap();
    assert_eq!(outcome, StopOutcome::Forced);
    assert_eq!(sup.state(), ProcessState::Stopped);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_abandoned_stop_settles_back_to_running() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(STUBBORN_SERVER);
    let started = sup.start().await.unwrap();

    // Give up while the stop is still waiting out its grace period.
    let abandoned = tokio::time::timeout(Duration::from_millis(300), sup.stop()).await;
    assert!(abandoned.is_err());
    assert_eq!(sup.state(), ProcessState::Running);
    assert_eq!(sup.status().await.pid, Some(started.pid));

    // The server is still usable and a full stop goes through.
    sup.send_command("still here").await.unwrap();
    assert!(wait_for_output(&sup, "ignoring: still here", WAIT).await);
    assert_eq!(sup.stop().await.unwrap(), StopOutcome::Forced);
    assert_eq!(sup.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn test_abandoned_start_settles_to_running() {
    let fixture = Fixture::new();
    let sup = fixture.supervisor(SILENT_SERVER);

    // The readiness wait is 5s; abandon it early.
    let abandoned = tokio::time::timeout(Duration::from_millis(300), sup.start()).await;
    assert!(abandoned.is_err());
    assert_eq!(sup.state(), ProcessState::Running);
    assert!(sup.status().await.pid.is_some());

    assert!(matches!(
        sup.stop().await.unwrap(),
        StopOutcome::Graceful { .. }
    ));
    assert_eq!(sup.state(), ProcessState::Stopped);
}
