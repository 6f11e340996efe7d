//! End-to-end tests for the verification pipeline.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use preview_supervisor::certificate::{CERTIFICATE_FILE, FAILURE_FILE};
use preview_supervisor::models::certificate::{VerdictStatus, VerifyStep};
use preview_supervisor::verify::{Verdict, Verifier, VerifyRequest, LOG_DIR};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{free_port, spawn_ok_server, test_config, write_manifest, write_script};

const DEV_MANIFEST: &str = r#"{"scripts": {"dev": "sh serve.sh"}}"#;

fn verifier(runtime: &Path) -> Verifier {
    Verifier::new(Arc::new(test_config(runtime)))
}

fn request(target: &Path) -> VerifyRequest {
    VerifyRequest {
        skip_install: true,
        skip_build: true,
        dev_command: Some("sh serve.sh".into()),
        ..VerifyRequest::new(target)
    }
}

fn expect_fail(verdict: Verdict) -> preview_supervisor::models::certificate::FailureReport {
    match verdict {
        Verdict::Fail { report, .. } => report,
        Verdict::Pass { certificate, .. } => panic!("unexpected pass: {}", certificate.url),
    }
}

// ── PASS ─────────────────────────────────────────────────────

#[tokio::test]
async fn serving_dev_server_earns_a_certificate() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    let (port, server) = spawn_ok_server().await;
    write_manifest(project.path(), DEV_MANIFEST);
    std::fs::write(project.path().join("package-lock.json"), "{}").expect("lock");
    write_script(
        project.path(),
        "serve.sh",
        &format!("echo \"  Local: http://127.0.0.1:{port}/\"\nsleep 30\n"),
    );

    let req = VerifyRequest {
        port: Some(free_port()),
        ..request(project.path())
    };
    let verdict = verifier(runtime.path())
        .run(&req, &CancellationToken::new())
        .await;
    server.cancel();

    assert_eq!(verdict.exit_code(), 0);
    let Verdict::Pass { certificate, path } = verdict else {
        panic!("expected pass");
    };
    assert_eq!(certificate.status, VerdictStatus::Pass);
    assert_eq!(certificate.port, Some(port));
    assert!(certificate.attempts >= 1);
    assert!(certificate.hashes.manifest_sha256.is_some());
    assert!(certificate.hashes.lockfile_sha256.is_some());
    assert!(certificate.log_file_path.starts_with(project.path().join(LOG_DIR)));

    assert_eq!(path, project.path().join(CERTIFICATE_FILE));
    assert!(path.exists());
    assert!(!project.path().join(FAILURE_FILE).exists());
}

// ── FAIL ─────────────────────────────────────────────────────

#[tokio::test]
async fn crashing_dev_server_is_reported_with_exit_code() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    write_script(project.path(), "serve.sh", "echo 'SyntaxError: bad token' >&2\nexit 1\n");
    std::fs::write(project.path().join(CERTIFICATE_FILE), "{}").expect("stale certificate");

    let verdict = verifier(runtime.path())
        .run(&request(project.path()), &CancellationToken::new())
        .await;
    assert_eq!(verdict.exit_code(), 1);
    let report = expect_fail(verdict);

    assert_eq!(report.step, VerifyStep::Readiness);
    assert_eq!(report.error_kind, "premature_exit");
    assert!(report.error.contains("code 1"), "{}", report.error);
    assert_eq!(report.exit_code, Some(1));
    assert!(report.trailing_output.contains("SyntaxError"));
    assert!(report.remediation.is_some());
    assert!(!project.path().join(CERTIFICATE_FILE).exists());
    assert!(project.path().join(FAILURE_FILE).exists());
}

#[tokio::test]
async fn missing_manifest_fails_precheck_without_spawning() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");

    let report = expect_fail(
        verifier(runtime.path())
            .run(&VerifyRequest::new(project.path()), &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Precheck);
    assert_eq!(report.error_kind, "detection");
    assert!(report.log_file_path.is_none());
    assert!(!project.path().join(LOG_DIR).exists());
    assert!(project.path().join(FAILURE_FILE).exists());
}

#[tokio::test]
async fn forbidden_install_flag_is_rejected_before_install() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);

    let req = VerifyRequest {
        install_command: Some("npm install --legacy-peer-deps".into()),
        ..VerifyRequest::new(project.path())
    };
    let report = expect_fail(
        verifier(runtime.path())
            .run(&req, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Precheck);
    assert_eq!(report.error_kind, "validation");
    assert!(report.error.contains("--legacy-peer-deps"));
    assert!(!project.path().join(LOG_DIR).exists());
}

#[tokio::test]
async fn dev_command_outside_allow_list_is_rejected() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    std::fs::create_dir(project.path().join("keep")).expect("mkdir");

    let req = VerifyRequest {
        dev_command: Some("rm -rf keep".into()),
        ..request(project.path())
    };
    let report = expect_fail(
        verifier(runtime.path())
            .run(&req, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Precheck);
    assert_eq!(report.error_kind, "validation");
    assert!(report.error.contains("allowed list"), "{}", report.error);
    assert!(project.path().join("keep").is_dir());
}

#[tokio::test]
async fn silent_dev_server_times_out_with_failure_report() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    write_script(project.path(), "serve.sh", "echo compiling\nsleep 30\n");

    let req = VerifyRequest {
        port: Some(free_port()),
        timeout: Some(Duration::from_secs(1)),
        ..request(project.path())
    };
    let report = expect_fail(
        verifier(runtime.path())
            .run(&req, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Readiness);
    assert_eq!(report.error_kind, "timeout");
    assert!(report.error.contains("did not become ready"), "{}", report.error);
    assert!(report.trailing_output.contains("compiling"));

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(project.path().join(FAILURE_FILE)).expect("failure report"),
    )
    .expect("json");
    assert_eq!(written["errorKind"], "timeout");
    assert_eq!(written["status"], "FAIL");
    assert!(!project.path().join(CERTIFICATE_FILE).exists());
}

#[tokio::test]
async fn failing_install_stops_the_pipeline() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    write_script(project.path(), "install.sh", "echo 'ERESOLVE unable to resolve' >&2\nexit 2\n");

    let req = VerifyRequest {
        skip_install: false,
        install_command: Some("sh install.sh".into()),
        ..request(project.path())
    };
    let report = expect_fail(
        verifier(runtime.path())
            .run(&req, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Install);
    assert_eq!(report.error_kind, "step_failed");
    assert_eq!(report.exit_code, Some(2));
    assert!(report.trailing_output.contains("ERESOLVE"));
    assert!(report.log_file_path.is_some());
}

#[tokio::test]
async fn explicit_port_already_taken_is_a_conflict() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    let held = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = held.local_addr().expect("addr").port();

    let req = VerifyRequest {
        port: Some(port),
        ..request(project.path())
    };
    let report = expect_fail(
        verifier(runtime.path())
            .run(&req, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.step, VerifyStep::Precheck);
    assert_eq!(report.error_kind, "port_conflict");
    assert!(report.error.contains(&port.to_string()));
}

#[tokio::test]
async fn missing_target_is_not_created() {
    let parent = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    let target = parent.path().join("does-not-exist");

    let verdict = verifier(runtime.path())
        .run(&VerifyRequest::new(&target), &CancellationToken::new())
        .await;
    let Verdict::Fail { report, path } = verdict else {
        panic!("expected fail");
    };

    assert_eq!(report.error_kind, "validation");
    assert!(path.is_none());
    assert!(!target.exists());
}

#[tokio::test]
async fn interrupt_during_readiness_fails_and_returns() {
    let project = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    write_script(project.path(), "serve.sh", "echo compiling\nsleep 30\n");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let report = expect_fail(
        verifier(runtime.path())
            .run(&request(project.path()), &cancel)
            .await,
    );

    assert_eq!(report.error_kind, "interrupted");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn artifacts_dir_overrides_target() {
    let project = tempfile::tempdir().expect("tempdir");
    let artifacts = tempfile::tempdir().expect("tempdir");
    let runtime = tempfile::tempdir().expect("tempdir");
    write_manifest(project.path(), DEV_MANIFEST);
    write_script(project.path(), "serve.sh", "exit 4\n");

    let req = VerifyRequest {
        artifacts_dir: Some(artifacts.path().to_path_buf()),
        ..request(project.path())
    };
    let verdict = verifier(runtime.path())
        .run(&req, &CancellationToken::new())
        .await;
    let Verdict::Fail { report, path } = verdict else {
        panic!("expected fail");
    };

    assert_eq!(report.exit_code, Some(4));
    assert_eq!(path, Some(artifacts.path().join(FAILURE_FILE)));
    assert!(!project.path().join(FAILURE_FILE).exists());
}
