//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Caller input rejected before any work started.
    Validation(String),
    /// No manifest, or no runnable script, in the target directory.
    Detection(String),
    /// The operating system refused to start the child process.
    Spawn(String),
    /// The child exited before it was observed serving traffic.
    PrematureExit(String),
    /// The child stayed alive but never became reachable in time.
    Timeout(String),
    /// The requested port is held by an unrelated process.
    PortConflict(String),
    /// An install or build step ran but did not succeed.
    StepFailed(String),
    /// The operation was cancelled by an interrupt.
    Interrupted(String),
    /// Session state or artifact could not be written.
    Persistence(String),
    /// Outbound HTTP request failure.
    Http(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Short machine-readable label used in failure reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Detection(_) => "detection",
            Self::Spawn(_) => "spawn",
            Self::PrematureExit(_) => "premature_exit",
            Self::Timeout(_) => "timeout",
            Self::PortConflict(_) => "port_conflict",
            Self::StepFailed(_) => "step_failed",
            Self::Interrupted(_) => "interrupted",
            Self::Persistence(_) => "persistence",
            Self::Http(_) => "http",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
        }
    }

    /// Whether the error stems from caller input rather than the environment.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Detection(_) | Self::NotFound(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Detection(msg) => write!(f, "detection: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::PrematureExit(msg) => write!(f, "premature exit: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::PortConflict(msg) => write!(f, "port conflict: {msg}"),
            Self::StepFailed(msg) => write!(f, "step failed: {msg}"),
            Self::Interrupted(msg) => write!(f, "interrupted: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("json: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
