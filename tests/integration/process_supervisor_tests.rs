//! Integration tests for spawning, observing and stopping children.

#![cfg(unix)]

use std::time::{Duration, Instant};

use preview_supervisor::command::CommandLine;
use preview_supervisor::process::{
    LaunchSpec, ProcessSupervisor, StopOutcome, StreamKind,
};
use preview_supervisor::AppError;

use super::test_helpers::{spawn_sh, wait_for_output};

// ── Observation ──────────────────────────────────────────────

#[tokio::test]
async fn exit_code_and_output_are_captured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "echo hello; echo oops >&2; exit 3");

    assert!(handle.observer().wait_for_exit(Duration::from_secs(5)).await);
    assert_eq!(handle.exit_code(), Some(3));

    let lines = handle.observer().output().lines_from(0);
    assert!(lines
        .iter()
        .any(|l| l.stream == StreamKind::Stdout && l.text == "hello"));
    assert!(lines
        .iter()
        .any(|l| l.stream == StreamKind::Stderr && l.text == "oops"));
    assert_eq!(lines.last().map(|l| l.stream), Some(StreamKind::Exit));

    let log = std::fs::read_to_string(dir.path().join("child.log")).expect("log");
    assert!(log.contains("[stdout] hello"));
    assert!(log.contains("[stderr] oops"));
    assert!(log.contains("[exit]"));
}

#[tokio::test]
async fn wait_for_exit_times_out_on_a_live_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 30");

    assert!(!handle.observer().wait_for_exit(Duration::from_millis(200)).await);
    assert!(!handle.has_exited());

    supervisor.stop(&handle, Duration::from_secs(2)).await;
    assert!(handle.observer().wait_for_exit(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn env_and_cwd_are_applied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = supervisor
        .start(LaunchSpec {
            command: CommandLine::new("sh", &["-c", "echo \"$PREVIEW_TEST_VAR\"; pwd"]),
            cwd: dir.path().to_path_buf(),
            env: vec![("PREVIEW_TEST_VAR".into(), "from-test".into())],
            log_path: dir.path().join("env.log"),
        })
        .expect("spawn");
    assert!(handle.observer().wait_for_exit(Duration::from_secs(5)).await);

    let text = handle.observer().output().text();
    assert!(text.contains("from-test"));
    let canonical = dir.path().canonicalize().expect("canonical");
    assert!(text.contains(canonical.to_str().expect("utf8")), "{text}");
}

#[tokio::test]
async fn spawn_failure_is_reported_and_logged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let log_path = dir.path().join("missing.log");
    let result = supervisor.start(LaunchSpec {
        command: CommandLine::new("definitely-not-a-real-binary-7f3a", &[]),
        cwd: dir.path().to_path_buf(),
        env: Vec::new(),
        log_path: log_path.clone(),
    });
    assert!(matches!(result, Err(AppError::Spawn(_))));
    let log = std::fs::read_to_string(log_path).expect("log");
    assert!(log.contains("[error] failed to spawn"));
}

// ── Stopping ─────────────────────────────────────────────────

#[tokio::test]
async fn stop_terminates_cooperative_child_gracefully() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "echo up; sleep 30");
    wait_for_output(&handle, 1).await;

    let outcome = supervisor.stop(&handle, Duration::from_secs(3)).await;
    assert_eq!(outcome, StopOutcome::Graceful);
    assert!(handle.has_exited());
}

#[tokio::test]
async fn stop_escalates_when_term_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "trap '' TERM; echo armed; sleep 30");
    wait_for_output(&handle, 1).await;

    let grace = Duration::from_millis(500);
    let started = Instant::now();
    let outcome = supervisor.stop(&handle, grace).await;

    assert_eq!(outcome, StopOutcome::Forced);
    assert!(handle.has_exited());
    assert!(
        started.elapsed() < grace + Duration::from_secs(2),
        "stop took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn stop_after_exit_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "exit 0");
    assert!(handle.observer().wait_for_exit(Duration::from_secs(5)).await);

    let outcome = supervisor.stop(&handle, Duration::from_secs(1)).await;
    assert_eq!(outcome, StopOutcome::AlreadyExited);
    assert_eq!(handle.exit_code(), Some(0));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn stop_takes_down_grandchildren() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 30 & echo $!; wait");
    wait_for_output(&handle, 1).await;
    let grandchild: u32 = handle.observer().output().lines_from(0)[0]
        .text
        .trim()
        .parse()
        .expect("pid");

    supervisor.stop(&handle, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        !super::test_helpers::is_running(grandchild),
        "grandchild {grandchild} survived the stop"
    );
}
