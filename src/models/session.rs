//! Preview session model and lifecycle helpers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Lifecycle status for a preview session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Child spawned, not yet observed serving.
    Starting,
    /// Child observed serving.
    Running,
    /// Stopped on request.
    Stopped,
    /// Failed to become ready, or exited non-zero.
    Error,
    /// Exited on its own with code zero.
    Completed,
}

impl SessionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::Completed)
    }
}

/// How the preview is launched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// The manifest's own dev script.
    #[default]
    Dev,
    /// `expo start --dev-client` for custom development builds.
    DevClient,
}

/// URLs scraped from the session's output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUrls {
    /// Serving URL confirmed by readiness detection.
    pub primary: Option<String>,
    /// `exp://` URL for devices on the local network.
    pub lan: Option<String>,
    /// Devtools URL.
    pub devtools: Option<String>,
}

/// Session entity persisted in `sessions.json`. The process handle is
/// owned by the registry and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Time-based identifier, unique within this process.
    pub id: String,
    /// Project being previewed.
    pub target_directory: PathBuf,
    /// Launch mode.
    pub mode: SessionMode,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Discovered URLs.
    pub urls: SessionUrls,
    /// Child process id.
    pub pid: Option<u32>,
    /// Dev server log file.
    pub log_file_path: Option<PathBuf>,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
    /// Set on entering a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Most recent failure description.
    pub error: Option<String>,
}

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

/// `session_<millis>`, bumped past the previous id when the clock repeats.
#[must_use]
pub fn next_session_id() -> String {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_ID_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    format!("session_{}", now.max(prev + 1))
}

impl Session {
    /// Construct a new session in `starting` status.
    #[must_use]
    pub fn new(target_directory: PathBuf, mode: SessionMode) -> Self {
        Self {
            id: next_session_id(),
            target_directory,
            mode,
            status: SessionStatus::Starting,
            urls: SessionUrls::default(),
            pid: None,
            log_file_path: None,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Starting,
                SessionStatus::Running
                    | SessionStatus::Stopped
                    | SessionStatus::Error
                    | SessionStatus::Completed
            ) | (
                SessionStatus::Running,
                SessionStatus::Stopped | SessionStatus::Error | SessionStatus::Completed
            )
        )
    }

    /// Move to `next`, stamping `ended_at` on terminal statuses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a transition the lifecycle forbids.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "session {} cannot move from {:?} to {next:?}",
                self.id, self.status
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Whether the session is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
