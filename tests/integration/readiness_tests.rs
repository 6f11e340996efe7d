//! Integration tests for readiness detection against real children.

#![cfg(unix)]

use std::time::{Duration, Instant};

use preview_supervisor::process::ProcessSupervisor;
use preview_supervisor::readiness::{
    Discovery, ReadinessDetector, ReadinessFailure, ReadinessOptions,
};
use preview_supervisor::AppError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{free_port, spawn_ok_server, spawn_sh};

fn options(timeout: Duration) -> ReadinessOptions {
    ReadinessOptions {
        hint_url: None,
        timeout,
        poll_interval: Duration::from_millis(1000),
        probe_timeout: Duration::from_millis(500),
        scan_ports: Vec::new(),
        trailing_lines: 200,
        trailing_bytes: 2000,
    }
}

#[tokio::test]
async fn announced_url_that_serves_is_ready_after_one_probe() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (port, server) = spawn_ok_server().await;
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(
        &supervisor,
        dir.path(),
        &format!("echo '  Local: http://127.0.0.1:{port}/'; sleep 30"),
    );

    let detector = ReadinessDetector::new(options(Duration::from_secs(10))).expect("detector");
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.discovery, Some(Discovery::Log));
    assert_eq!(result.port, Some(port));
    assert_eq!(result.url.as_deref(), Some(format!("http://127.0.0.1:{port}/").as_str()));
    assert!(result.to_error().is_none());

    supervisor.stop(&handle, Duration::from_secs(2)).await;
    server.cancel();
}

#[tokio::test]
async fn child_exit_fails_fast_with_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "echo 'Error: cannot find module'; exit 1");

    let detector = ReadinessDetector::new(options(Duration::from_secs(30))).expect("detector");
    let started = Instant::now();
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(
        result.failure,
        Some(ReadinessFailure::PrematureExit { code: Some(1) })
    );
    assert!(result.error.as_deref().unwrap_or_default().contains("code 1"));
    assert!(result.trailing_output.contains("cannot find module"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(result.to_error(), Some(AppError::PrematureExit(_))));
}

#[tokio::test]
async fn exit_is_reported_while_a_grandchild_holds_the_pipes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 3 & exit 1");

    let mut opts = options(Duration::from_secs(30));
    opts.poll_interval = Duration::from_millis(100);
    let detector = ReadinessDetector::new(opts).expect("detector");
    let started = Instant::now();
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert_eq!(
        result.failure,
        Some(ReadinessFailure::PrematureExit { code: Some(1) })
    );
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "exit reported after {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn silent_child_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "echo compiling; sleep 30");

    let detector = ReadinessDetector::new(options(Duration::from_secs(1))).expect("detector");
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ReadinessFailure::Timeout));
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("did not become ready within 1s"));
    assert!(!handle.has_exited(), "detector must not kill the child");

    supervisor.stop(&handle, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn hint_url_is_probed_without_announcement() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (port, server) = spawn_ok_server().await;
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 30");

    let mut opts = options(Duration::from_secs(5));
    opts.poll_interval = Duration::from_millis(100);
    opts.hint_url = Some(format!("http://127.0.0.1:{port}"));
    let detector = ReadinessDetector::new(opts).expect("detector");
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.discovery, Some(Discovery::Hint));
    assert!(result.attempts >= 1);

    supervisor.stop(&handle, Duration::from_secs(2)).await;
    server.cancel();
}

#[tokio::test]
async fn port_scan_finds_silent_server_at_deadline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (port, server) = spawn_ok_server().await;
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 30");

    let mut opts = options(Duration::from_millis(500));
    opts.scan_ports = vec![free_port(), port];
    let detector = ReadinessDetector::new(opts).expect("detector");
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.discovery, Some(Discovery::PortScan));
    assert_eq!(result.port, Some(port));

    supervisor.stop(&handle, Duration::from_secs(2)).await;
    server.cancel();
}

#[tokio::test]
async fn address_in_use_then_exit_is_port_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(
        &supervisor,
        dir.path(),
        "echo 'Error: listen EADDRINUSE: address already in use :::3000' >&2; exit 1",
    );

    let detector = ReadinessDetector::new(options(Duration::from_secs(10))).expect("detector");
    let result = detector
        .wait_for_ready(handle.observer(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(
        result.failure,
        Some(ReadinessFailure::PortConflict { port: Some(3000) })
    );
    assert!(matches!(result.to_error(), Some(AppError::PortConflict(_))));
}

#[tokio::test]
async fn cancellation_interrupts_the_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::default();
    let handle = spawn_sh(&supervisor, dir.path(), "sleep 30");

    let detector = ReadinessDetector::new(options(Duration::from_secs(30))).expect("detector");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = detector.wait_for_ready(handle.observer(), &cancel).await;
    assert_eq!(result.failure, Some(ReadinessFailure::Interrupted));
    assert!(started.elapsed() < Duration::from_secs(5));

    supervisor.stop(&handle, Duration::from_secs(2)).await;
}
