//! One-shot verification pipeline behind `preview-supervisor verify`.
//!
//! precheck → install → build → launch → readiness → verdict → stop.
//! Every failure is captured as a [`FailureReport`]; the dev server is
//! stopped on every path, including interrupts.

pub mod browser;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::certificate::{file_sha256, git_commit, CertificateWriter};
use crate::command::CommandLine;
use crate::config::GlobalConfig;
use crate::manifest::{self, Detection};
use crate::models::certificate::{
    ArtifactHashes, Certificate, Environment, FailureReport, VerdictStatus, VerifyStep,
};
use crate::process::{LaunchSpec, ProcessHandle, ProcessSupervisor};
use crate::readiness::probe::port_in_use;
use crate::readiness::{ReadinessDetector, ReadinessOptions};
use crate::AppError;

/// Directory, under the artifacts directory, receiving step logs.
pub const LOG_DIR: &str = ".preview-logs";

/// Caller choices for one verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyRequest {
    /// Project to verify.
    pub target_dir: PathBuf,
    /// Port the dev server is asked to use; framework default otherwise.
    pub port: Option<u16>,
    /// Readiness deadline; configuration default otherwise.
    pub timeout: Option<Duration>,
    /// Skip dependency installation.
    pub skip_install: bool,
    /// Skip the `build` script.
    pub skip_build: bool,
    /// Open the URL in a browser after a PASS.
    pub open_browser: bool,
    /// Install command replacing the package manager default.
    pub install_command: Option<String>,
    /// Dev server command replacing the manifest script.
    pub dev_command: Option<String>,
    /// Where verdict documents go; the target directory otherwise.
    pub artifacts_dir: Option<PathBuf>,
}

impl VerifyRequest {
    /// Request with defaults for `target_dir`.
    #[must_use]
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The dev server served traffic.
    Pass {
        /// Written certificate.
        certificate: Certificate,
        /// Certificate location.
        path: PathBuf,
    },
    /// Verification failed.
    Fail {
        /// Failure details.
        report: FailureReport,
        /// Report location, if it could be written.
        path: Option<PathBuf>,
    },
}

impl Verdict {
    /// Whether the run passed.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Process exit code for the CLI.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_pass())
    }
}

#[derive(Debug)]
struct StepFailure {
    step: VerifyStep,
    error: AppError,
    exit_code: Option<i32>,
    log_path: Option<PathBuf>,
    trailing_output: String,
}

impl StepFailure {
    fn new(step: VerifyStep, error: AppError) -> Self {
        Self {
            step,
            error,
            exit_code: None,
            log_path: None,
            trailing_output: String::new(),
        }
    }
}

struct Prepared {
    target: PathBuf,
    detection: Detection,
    dev_command: CommandLine,
    port: u16,
    log_dir: PathBuf,
}

struct Passed {
    target: PathBuf,
    detection: Detection,
    url: String,
    port: Option<u16>,
    attempts: u32,
    log_path: PathBuf,
}

/// Runs the verification pipeline.
#[derive(Debug, Clone)]
pub struct Verifier {
    config: Arc<GlobalConfig>,
    supervisor: ProcessSupervisor,
}

impl Verifier {
    /// Verifier with the platform supervisor.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self::with_supervisor(config, ProcessSupervisor::default())
    }

    /// Verifier with an explicit supervisor.
    #[must_use]
    pub fn with_supervisor(config: Arc<GlobalConfig>, supervisor: ProcessSupervisor) -> Self {
        Self { config, supervisor }
    }

    /// Verify `request.target_dir` and record the verdict.
    ///
    /// `cancel` aborts the current step; the dev server is still stopped and
    /// a failure report still written.
    pub async fn run(&self, request: &VerifyRequest, cancel: &CancellationToken) -> Verdict {
        let span = info_span!("verify", target = %request.target_dir.display());
        self.run_inner(request, cancel).instrument(span).await
    }

    async fn run_inner(&self, request: &VerifyRequest, cancel: &CancellationToken) -> Verdict {
        let started = Instant::now();
        let artifacts_dir = request
            .artifacts_dir
            .clone()
            .unwrap_or_else(|| request.target_dir.clone());
        let writer = CertificateWriter::new(artifacts_dir.clone(), self.config.artifacts.clone());

        let (outcome, dev) = match self.prepare(request, &writer, &artifacts_dir, cancel).await {
            Ok(prepared) => self.launch_and_wait(request, prepared, cancel).await,
            Err(failure) => (Err(failure), None),
        };

        let verdict = Self::record(request, &writer, outcome, started);

        if let (Verdict::Pass { certificate, .. }, true) = (&verdict, request.open_browser) {
            if let Err(err) = browser::open_browser(&certificate.url) {
                warn!(%err, "could not open browser");
            }
        }
        if let Some(handle) = dev {
            let outcome = self
                .supervisor
                .stop(&handle, self.config.shutdown.grace_period())
                .await;
            info!(pid = handle.pid(), ?outcome, "dev server stopped");
        }
        verdict
    }

    async fn prepare(
        &self,
        request: &VerifyRequest,
        writer: &CertificateWriter,
        artifacts_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Prepared, StepFailure> {
        let precheck = |error| StepFailure::new(VerifyStep::Precheck, error);

        if !request.target_dir.is_dir() {
            return Err(precheck(AppError::Validation(format!(
                "target directory does not exist: {}",
                request.target_dir.display()
            ))));
        }
        let target = request
            .target_dir
            .canonicalize()
            .map_err(|err| precheck(AppError::Io(err.to_string())))?;
        writer.clear().map_err(precheck)?;

        let detection = manifest::detect(&target).map_err(precheck)?;

        let allowed = self.config.verify.allowed_commands.as_slice();
        let user_command = |raw: &str| {
            let command = CommandLine::parse(raw)?;
            command.ensure_allowed_program(allowed)?;
            Ok::<_, AppError>(command)
        };

        let install = match &request.install_command {
            Some(raw) => user_command(raw).map_err(precheck)?,
            None => detection.install_command(),
        };
        install.ensure_install_policy().map_err(precheck)?;

        let dev_command = match &request.dev_command {
            Some(raw) => user_command(raw).map_err(precheck)?,
            None => detection.run_command.clone(),
        };

        let port = request.port.unwrap_or(detection.default_port);
        if request.port.is_some() && port_in_use(port) {
            return Err(precheck(AppError::PortConflict(format!(
                "port {port} is already in use by another process"
            ))));
        }

        info!(
            package_manager = detection.package_manager.program(),
            project_type = detection.project_type.label(),
            dev = %dev_command,
            port,
            "precheck passed"
        );

        let log_dir = artifacts_dir.join(LOG_DIR);
        let install_timeout = Duration::from_secs(self.config.verify.install_timeout_seconds);
        let build_timeout = Duration::from_secs(self.config.verify.build_timeout_seconds);

        if request.skip_install {
            info!("install skipped");
        } else {
            self.run_step(VerifyStep::Install, &install, &target, &log_dir, install_timeout, cancel)
                .await?;
        }

        match detection.build_command() {
            Some(build) if !request.skip_build => {
                self.run_step(VerifyStep::Build, &build, &target, &log_dir, build_timeout, cancel)
                    .await?;
            }
            _ => info!("build skipped"),
        }

        Ok(Prepared {
            target,
            detection,
            dev_command,
            port,
            log_dir,
        })
    }

    async fn run_step(
        &self,
        step: VerifyStep,
        command: &CommandLine,
        target: &Path,
        log_dir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        if cancel.is_cancelled() {
            return Err(StepFailure::new(
                step,
                AppError::Interrupted(format!("interrupted before {}", step.as_str())),
            ));
        }
        let log_path = step_log_path(log_dir, step.as_str());
        let fail = |error, exit_code, trailing_output| StepFailure {
            step,
            error,
            exit_code,
            log_path: Some(log_path.clone()),
            trailing_output,
        };

        info!(step = step.as_str(), command = %command, "running step");
        let handle = self
            .supervisor
            .start(LaunchSpec {
                command: command.clone(),
                cwd: target.to_path_buf(),
                env: Vec::new(),
                log_path: log_path.clone(),
            })
            .map_err(|error| fail(error, None, String::new()))?;
        let observer = handle.observer().clone();
        let trailing = || {
            observer.output().trailing(
                self.config.artifacts.trailing_lines,
                self.config.artifacts.trailing_bytes,
            )
        };

        let finished = tokio::select! {
            exited = observer.wait_for_exit(timeout) => Some(exited),
            () = cancel.cancelled() => None,
        };
        match finished {
            Some(true) => {}
            Some(false) => {
                self.supervisor
                    .stop(&handle, self.config.shutdown.grace_period())
                    .await;
                return Err(fail(
                    AppError::Timeout(format!(
                        "{} did not finish within {}s",
                        step.as_str(),
                        timeout.as_secs()
                    )),
                    None,
                    trailing(),
                ));
            }
            None => {
                self.supervisor
                    .stop(&handle, self.config.shutdown.grace_period())
                    .await;
                return Err(fail(
                    AppError::Interrupted(format!("interrupted during {}", step.as_str())),
                    None,
                    trailing(),
                ));
            }
        }

        match observer.exit_code() {
            Some(0) => {
                info!(step = step.as_str(), "step succeeded");
                Ok(())
            }
            code => Err(fail(
                AppError::StepFailed(format!(
                    "`{command}` exited with {}",
                    code.map_or_else(|| "a signal".to_owned(), |c| format!("code {c}"))
                )),
                code,
                trailing(),
            )),
        }
    }

    async fn launch_and_wait(
        &self,
        request: &VerifyRequest,
        prepared: Prepared,
        cancel: &CancellationToken,
    ) -> (Result<Passed, StepFailure>, Option<ProcessHandle>) {
        let log_path = step_log_path(&prepared.log_dir, "dev");
        let hint_url = format!("http://localhost:{}", prepared.port);
        let timeout = request
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.verify.timeout_seconds));

        let detector = match ReadinessDetector::new(ReadinessOptions::from_config(
            &self.config,
            Some(hint_url.clone()),
            timeout,
        )) {
            Ok(detector) => detector,
            Err(error) => return (Err(StepFailure::new(VerifyStep::Readiness, error)), None),
        };

        let spec = LaunchSpec {
            command: prepared.dev_command.clone(),
            cwd: prepared.target.clone(),
            env: vec![
                ("PORT".to_owned(), prepared.port.to_string()),
                ("BROWSER".to_owned(), "none".to_owned()),
            ],
            log_path: log_path.clone(),
        };
        let handle = match self.supervisor.start(spec) {
            Ok(handle) => handle,
            Err(error) => {
                let mut failure = StepFailure::new(VerifyStep::Launch, error);
                failure.log_path = Some(log_path);
                return (Err(failure), None);
            }
        };

        let result = detector.wait_for_ready(handle.observer(), cancel).await;
        let outcome = if result.success {
            Ok(Passed {
                target: prepared.target,
                detection: prepared.detection,
                url: result.url.unwrap_or(hint_url),
                port: result.port,
                attempts: result.attempts,
                log_path,
            })
        } else {
            let error = result
                .to_error()
                .unwrap_or_else(|| AppError::Timeout("dev server never became ready".into()));
            Err(StepFailure {
                step: VerifyStep::Readiness,
                error,
                exit_code: handle.exit_code(),
                log_path: Some(log_path),
                trailing_output: result.trailing_output,
            })
        };
        (outcome, Some(handle))
    }

    fn record(
        request: &VerifyRequest,
        writer: &CertificateWriter,
        outcome: Result<Passed, StepFailure>,
        started: Instant,
    ) -> Verdict {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let failure = match outcome {
            Ok(passed) => {
                let commit = git_commit(&passed.target);
                let certificate = Certificate {
                    status: VerdictStatus::Pass,
                    timestamp: Utc::now(),
                    target_directory: passed.target,
                    url: passed.url,
                    port: passed.port,
                    attempts: passed.attempts,
                    log_file_path: passed.log_path,
                    duration_ms,
                    package_manager: Some(passed.detection.package_manager),
                    project_type: Some(passed.detection.project_type),
                    hashes: ArtifactHashes {
                        manifest_sha256: file_sha256(&passed.detection.manifest_path),
                        lockfile_sha256: passed
                            .detection
                            .lockfile
                            .as_deref()
                            .and_then(file_sha256),
                        git_commit: commit,
                    },
                    environment: Environment::current(),
                };
                match writer.write_success(&certificate) {
                    Ok(path) => return Verdict::Pass { certificate, path },
                    Err(error) => {
                        error!(%error, "certificate could not be written");
                        StepFailure::new(VerifyStep::Readiness, error)
                    }
                }
            }
            Err(failure) => failure,
        };

        warn!(
            step = failure.step.as_str(),
            kind = failure.error.kind(),
            error = %failure.error,
            "verification failed"
        );
        let report = FailureReport {
            status: VerdictStatus::Fail,
            timestamp: Utc::now(),
            target_directory: request
                .target_dir
                .canonicalize()
                .unwrap_or_else(|_| request.target_dir.clone()),
            error: failure.error.to_string(),
            error_kind: failure.error.kind().to_owned(),
            step: failure.step,
            exit_code: failure.exit_code,
            log_file_path: failure.log_path,
            trailing_output: failure.trailing_output,
            remediation: remediation(&failure.error).map(str::to_owned),
            duration_ms,
            environment: Environment::current(),
        };

        // Never create a missing target just to hold the report.
        if request.artifacts_dir.is_none() && !request.target_dir.is_dir() {
            return Verdict::Fail { report, path: None };
        }
        let path = match writer.write_failure(report.clone()) {
            Ok(path) => Some(path),
            Err(error) => {
                error!(%error, "failure report could not be written");
                None
            }
        };
        Verdict::Fail { report, path }
    }
}

fn step_log_path(log_dir: &Path, name: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    log_dir.join(format!("{name}-{stamp}.log"))
}

/// Suggested next action for a failure class.
#[must_use]
pub fn remediation(error: &AppError) -> Option<&'static str> {
    Some(match error {
        AppError::Detection(_) => {
            "Add a package.json declaring a dev, start, serve, develop or watch script."
        }
        AppError::Validation(_) => {
            "Fix the rejected input; forbidden install flags hide dependency conflicts that must be resolved instead."
        }
        AppError::Spawn(_) => "Check that the package manager is installed and on PATH.",
        AppError::PrematureExit(_) => {
            "The dev server crashed during startup; see trailingOutput and the log file."
        }
        AppError::PortConflict(_) => {
            "Stop the process holding the port or choose another one with --port."
        }
        AppError::Timeout(_) => {
            "The server never answered; check the port it binds or raise --timeout."
        }
        AppError::StepFailed(_) => "Fix the failing install or build step; see the log file.",
        AppError::Interrupted(_) => "Verification was interrupted; run it again.",
        _ => return None,
    })
}
