//! On-disk verdict documents.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{PackageManager, ProjectType};

/// Verdict label written into both documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    /// Server observed serving.
    Pass,
    /// Verification failed.
    Fail,
}

/// Pipeline step a failure happened in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStep {
    /// Target and manifest checks before anything runs.
    Precheck,
    /// Dependency install.
    Install,
    /// Build script.
    Build,
    /// Dev server spawn.
    Launch,
    /// Readiness wait.
    Readiness,
}

impl VerifyStep {
    /// Lowercase step name used in logs and log file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::Install => "install",
            Self::Build => "build",
            Self::Launch => "launch",
            Self::Readiness => "readiness",
        }
    }
}

/// Host facts recorded with every verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Operating system family.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
}

impl Environment {
    /// The current host.
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }
}

/// SHA-256 digests of the inputs that decided the dependency tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHashes {
    /// Digest of `package.json`.
    pub manifest_sha256: Option<String>,
    /// Digest of the lock file, if any.
    pub lockfile_sha256: Option<String>,
    /// `HEAD` of the project's git checkout, if it is one.
    #[serde(default)]
    pub git_commit: Option<String>,
}

/// `RUN_CERTIFICATE.json`: proof the dev server served traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Always [`VerdictStatus::Pass`].
    pub status: VerdictStatus,
    /// When the verdict was reached.
    pub timestamp: DateTime<Utc>,
    /// Project that was verified.
    pub target_directory: PathBuf,
    /// Serving URL.
    pub url: String,
    /// Serving port.
    pub port: Option<u16>,
    /// HTTP probes issued.
    pub attempts: u32,
    /// Dev server log.
    pub log_file_path: PathBuf,
    /// Whole pipeline duration.
    pub duration_ms: u64,
    /// Detected package manager.
    pub package_manager: Option<PackageManager>,
    /// Detected project type.
    pub project_type: Option<ProjectType>,
    /// Input digests.
    pub hashes: ArtifactHashes,
    /// Host facts.
    pub environment: Environment,
}

/// `RUN_FAILURE.json`: why verification failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Always [`VerdictStatus::Fail`].
    pub status: VerdictStatus,
    /// When the verdict was reached.
    pub timestamp: DateTime<Utc>,
    /// Project that was verified.
    pub target_directory: PathBuf,
    /// Failure description.
    pub error: String,
    /// Machine-readable failure class.
    pub error_kind: String,
    /// Step that failed.
    pub step: VerifyStep,
    /// Exit code of the failing child, if it exited.
    pub exit_code: Option<i32>,
    /// Log of the failing child, if one was spawned.
    pub log_file_path: Option<PathBuf>,
    /// Redacted tail of the failing child's output.
    pub trailing_output: String,
    /// Suggested next action.
    pub remediation: Option<String>,
    /// Whole pipeline duration.
    pub duration_ms: u64,
    /// Host facts.
    pub environment: Environment,
}
