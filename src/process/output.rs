//! Captured child output: in-memory line buffer plus append-only log file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::warn;

use crate::{AppError, Result};

/// Origin of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Child standard output.
    Stdout,
    /// Child standard error.
    Stderr,
    /// Exit notice written by the supervisor.
    Exit,
    /// Spawn or read failure written by the supervisor.
    Error,
}

impl StreamKind {
    /// Tag written between brackets in the log file.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Exit => "exit",
            Self::Error => "error",
        }
    }
}

/// One captured line with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Stream the line arrived on.
    pub stream: StreamKind,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Unbounded, append-only record of everything a child printed.
///
/// Observers track a line index and wake on [`OutputBuffer::subscribe`]
/// whenever the length grows, so no line is ever missed.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: Mutex<Vec<OutputLine>>,
    len_tx: watch::Sender<usize>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            lines: Mutex::new(Vec::new()),
            len_tx,
        }
    }

    /// Append a line and notify subscribers.
    pub fn push(&self, stream: StreamKind, text: &str) {
        let len = {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            lines.push(OutputLine {
                stream,
                text: text.to_owned(),
            });
            lines.len()
        };
        self.len_tx.send_replace(len);
    }

    /// Number of lines captured so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been captured yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines from index `start` onwards.
    #[must_use]
    pub fn lines_from(&self, start: usize) -> Vec<OutputLine> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.get(start..).map(<[OutputLine]>::to_vec).unwrap_or_default()
    }

    /// Receiver that changes whenever a line is appended.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Whole output joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Last `max_lines` lines, cut further to the last `max_bytes` bytes.
    #[must_use]
    pub fn trailing(&self, max_lines: usize, max_bytes: usize) -> String {
        let joined = {
            let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            let start = lines.len().saturating_sub(max_lines);
            lines[start..]
                .iter()
                .map(|line| line.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        tail_bytes(&joined, max_bytes).to_owned()
    }
}

/// Suffix of `text` no longer than `max_bytes`, cut on a char boundary.
#[must_use]
pub fn tail_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Append-only log file with one timestamped, tagged line per record.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogSink {
    /// Open (creating parents) the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory or file cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Io(format!("failed to create log dir {}: {err}", parent.display()))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| AppError::Io(format!("failed to open log {}: {err}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `<ISO-8601> [<tag>] <text>`. A failing write disables the sink.
    pub fn write_line(&self, stream: StreamKind, text: &str) {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_mut() else {
            return;
        };
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(err) = writeln!(file, "{stamp} [{}] {text}", stream.tag()) {
            warn!(path = %self.path.display(), %err, "log write failed; disabling log sink");
            *guard = None;
        }
    }
}
