//! Atomic JSON persistence shared by the session store and verdict writer.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Serialize `value` as pretty JSON into `path` via write-then-rename.
///
/// # Errors
///
/// Returns `AppError::Persistence` on any I/O or serialization failure.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| {
        AppError::Persistence(format!("failed to create {}: {err}", dir.display()))
    })?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| AppError::Persistence(format!("failed to create temp file: {err}")))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Persistence(format!("failed to write temp file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Persistence(format!("failed to persist {}: {}", path.display(), err.error))
    })?;
    Ok(())
}
