//! Certificate and failure report writer.
//!
//! A directory holds at most one verdict: both files are removed before a
//! run starts and again before either is written. Each write goes to a
//! temporary file in the same directory and is renamed into place, so a
//! reader never observes a half-written document.

pub mod redact;

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ArtifactsConfig;
use crate::models::certificate::{Certificate, FailureReport};
use crate::persist::write_json_atomic;
use crate::process::output::tail_bytes;
use crate::{AppError, Result};

/// File name of the PASS certificate.
pub const CERTIFICATE_FILE: &str = "RUN_CERTIFICATE.json";

/// File name of the FAIL report.
pub const FAILURE_FILE: &str = "RUN_FAILURE.json";

/// Writes verdict documents into one artifacts directory.
#[derive(Debug, Clone)]
pub struct CertificateWriter {
    artifacts_dir: PathBuf,
    settings: ArtifactsConfig,
}

impl CertificateWriter {
    /// Writer targeting `artifacts_dir`.
    #[must_use]
    pub fn new(artifacts_dir: PathBuf, settings: ArtifactsConfig) -> Self {
        Self {
            artifacts_dir,
            settings,
        }
    }

    /// Where the certificate lives.
    #[must_use]
    pub fn certificate_path(&self) -> PathBuf {
        self.artifacts_dir.join(CERTIFICATE_FILE)
    }

    /// Where the failure report lives.
    #[must_use]
    pub fn failure_path(&self) -> PathBuf {
        self.artifacts_dir.join(FAILURE_FILE)
    }

    /// Delete any previous certificate and failure report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if an existing file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        for path in [self.certificate_path(), self.failure_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed previous verdict"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AppError::Persistence(format!(
                        "failed to remove {}: {err}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Replace any previous verdict with `certificate`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be written.
    pub fn write_success(&self, certificate: &Certificate) -> Result<PathBuf> {
        self.clear()?;
        let path = self.certificate_path();
        write_json_atomic(&path, certificate)?;
        info!(path = %path.display(), url = %certificate.url, "certificate written");
        Ok(path)
    }

    /// Replace any previous verdict with `report`, bounding and redacting
    /// its trailing output first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document cannot be written.
    pub fn write_failure(&self, mut report: FailureReport) -> Result<PathBuf> {
        report.trailing_output = self.prepare_excerpt(&report.trailing_output);
        self.clear()?;
        let path = self.failure_path();
        write_json_atomic(&path, &report)?;
        info!(path = %path.display(), error = %report.error, "failure report written");
        Ok(path)
    }

    fn prepare_excerpt(&self, raw: &str) -> String {
        let lines: Vec<&str> = raw.lines().collect();
        let start = lines.len().saturating_sub(self.settings.trailing_lines);
        let kept = lines[start..].join("\n");
        let kept = tail_bytes(&kept, self.settings.trailing_bytes);
        if self.settings.redact {
            redact::redact_text(kept)
        } else {
            kept.to_owned()
        }
    }
}

/// Hex SHA-256 of a file, `None` if it cannot be read.
#[must_use]
pub fn file_sha256(path: &Path) -> Option<String> {
    let mut file = fs::File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Some(
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    )
}

/// `HEAD` commit of the git checkout containing `dir`.
///
/// `None` when git is missing or `dir` is not inside a work tree.
#[must_use]
pub fn git_commit(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(dir = %dir.display(), "no git commit for project");
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?.trim().to_owned();
    (!commit.is_empty()).then_some(commit)
}
