//! Global configuration parsing and validation.
//!
//! Every key is optional: a missing file or an empty table yields the
//! built-in defaults, and CLI flags may override individual values after
//! loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::command::DEFAULT_ALLOWED_PROGRAMS;
use crate::manifest::ProjectType;
use crate::process::REAP_WINDOW;
use crate::{AppError, Result};

/// Readiness wait tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReadinessConfig {
    /// Overall readiness deadline for supervised sessions.
    #[serde(default = "default_readiness_timeout")]
    pub timeout_seconds: u64,
    /// Interval between active HTTP probes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Per-request timeout for a single HTTP probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Ports checked by the fallback scan when no URL was ever discovered.
    #[serde(default = "default_scan_ports")]
    pub scan_ports: Vec<u16>,
}

fn default_readiness_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_probe_timeout() -> u64 {
    5000
}

fn default_scan_ports() -> Vec<u16> {
    vec![3000, 3001, 5173, 5174, 4321, 8080, 8081]
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_readiness_timeout(),
            poll_interval_ms: default_poll_interval(),
            probe_timeout_ms: default_probe_timeout(),
            scan_ports: default_scan_ports(),
        }
    }
}

impl ReadinessConfig {
    /// Overall readiness deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Interval between probes.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout of one probe request.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Two-phase shutdown tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShutdownConfig {
    /// Time between the graceful and the forceful termination phase.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
    /// Hard bound on the whole shutdown after an interrupt.
    #[serde(default = "default_hard_exit")]
    pub hard_exit_seconds: u64,
}

fn default_grace_period() -> u64 {
    3000
}

fn default_hard_exit() -> u64 {
    5
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            hard_exit_seconds: default_hard_exit(),
        }
    }
}

impl ShutdownConfig {
    /// Grace period before escalation.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Upper bound on interrupt-driven shutdown.
    #[must_use]
    pub fn hard_exit(&self) -> Duration {
        Duration::from_secs(self.hard_exit_seconds)
    }
}

/// Failure report excerpt settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ArtifactsConfig {
    /// Maximum number of trailing output lines kept in a failure report.
    #[serde(default = "default_trailing_lines")]
    pub trailing_lines: usize,
    /// Maximum number of trailing output bytes kept in a failure report.
    #[serde(default = "default_trailing_bytes")]
    pub trailing_bytes: usize,
    /// Whether secret-looking output is masked before it is written.
    #[serde(default = "default_true")]
    pub redact: bool,
}

fn default_trailing_lines() -> usize {
    200
}

fn default_trailing_bytes() -> usize {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            trailing_lines: default_trailing_lines(),
            trailing_bytes: default_trailing_bytes(),
            redact: true,
        }
    }
}

/// Long-lived preview service settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Directory holding `sessions.json` and per-session logs.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Project types the registry agrees to preview.
    #[serde(default = "default_previewable")]
    pub previewable_frameworks: Vec<String>,
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".runtime")
}

fn default_previewable() -> Vec<String> {
    [
        "expo", "nextjs", "vite", "remix", "nuxt", "astro", "svelte", "cra", "vue", "react",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            previewable_frameworks: default_previewable(),
        }
    }
}

/// One-shot verification settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct VerifyConfig {
    /// Readiness deadline used by `verify`; dev servers often compile on first hit.
    #[serde(default = "default_verify_timeout")]
    pub timeout_seconds: u64,
    /// Deadline for the dependency install step.
    #[serde(default = "default_step_timeout")]
    pub install_timeout_seconds: u64,
    /// Deadline for the build script step.
    #[serde(default = "default_step_timeout")]
    pub build_timeout_seconds: u64,
    /// Programs `--install` and `--dev` may name; a trailing path is allowed.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    DEFAULT_ALLOWED_PROGRAMS
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_verify_timeout() -> u64 {
    90
}

fn default_step_timeout() -> u64 {
    600
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_verify_timeout(),
            install_timeout_seconds: default_step_timeout(),
            build_timeout_seconds: default_step_timeout(),
            allowed_commands: default_allowed_commands(),
        }
    }
}

fn default_http_port() -> u16 {
    3456
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Port of the HTTP control surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Readiness detection tuning.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Stop and interrupt timings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Certificate and failure report settings.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Session registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Verification pipeline settings.
    #[serde(default)]
    pub verify: VerifyConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            readiness: ReadinessConfig::default(),
            shutdown: ShutdownConfig::default(),
            artifacts: ArtifactsConfig::default(),
            registry: RegistryConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.readiness.timeout_seconds == 0 {
            return Err(AppError::Config(
                "readiness.timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "readiness.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.readiness.probe_timeout_ms == 0 {
            return Err(AppError::Config(
                "readiness.probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.shutdown.hard_exit_seconds == 0 {
            return Err(AppError::Config(
                "shutdown.hard_exit_seconds must be greater than zero".into(),
            ));
        }
        // The hard bound must leave room for SIGKILL and the reap window.
        let stop_budget = self.shutdown.grace_period() + REAP_WINDOW;
        if self.shutdown.hard_exit() <= stop_budget {
            return Err(AppError::Config(format!(
                "shutdown.hard_exit_seconds must exceed grace_period_ms plus the {}ms reap window ({}ms)",
                REAP_WINDOW.as_millis(),
                stop_budget.as_millis()
            )));
        }
        if self.verify.timeout_seconds == 0 {
            return Err(AppError::Config(
                "verify.timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.verify.allowed_commands.is_empty() {
            return Err(AppError::Config(
                "verify.allowed_commands must name at least one program".into(),
            ));
        }
        if let Some(unknown) = self
            .registry
            .previewable_frameworks
            .iter()
            .find(|label| ProjectType::from_label(label).is_none())
        {
            return Err(AppError::Config(format!(
                "registry.previewable_frameworks: unknown project type `{unknown}`"
            )));
        }
        Ok(())
    }

    /// Path of the persisted session state file.
    #[must_use]
    pub fn sessions_file(&self) -> PathBuf {
        self.registry.runtime_dir.join("sessions.json")
    }

    /// Directory for per-session dev server logs.
    #[must_use]
    pub fn session_log_dir(&self) -> PathBuf {
        self.registry.runtime_dir.join("logs")
    }
}
