//! On-disk session state (`sessions.json`).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::session::Session;
use crate::persist::write_json_atomic;
use crate::Result;

/// Document stored in `sessions.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Current session, if any.
    pub current_session: Option<Session>,
    /// Time of the last write.
    pub last_updated: DateTime<Utc>,
}

/// Reads and atomically rewrites the session state file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// State file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file. Missing or unreadable state reads as `None`.
    #[must_use]
    pub fn load(&self) -> Option<SessionState> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ignoring unreadable session state");
                None
            }
        }
    }

    /// Replace the stored state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file cannot be written.
    pub fn save(&self, current: Option<&Session>) -> Result<()> {
        let state = SessionState {
            current_session: current.cloned(),
            last_updated: Utc::now(),
        };
        write_json_atomic(&self.path, &state)
    }

    /// Drop whatever a previous process left behind.
    ///
    /// Its child process, if any, is not ours to manage, so the recorded
    /// session is only reported and forgotten.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the reset state cannot be written.
    pub fn discard_stale(&self) -> Result<Option<Session>> {
        let stale = self.load().and_then(|state| state.current_session);
        if let Some(session) = &stale {
            warn!(
                session_id = %session.id,
                status = ?session.status,
                pid = ?session.pid,
                "discarding session recorded by a previous run"
            );
        }
        self.save(None)?;
        Ok(stale)
    }
}
