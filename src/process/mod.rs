//! Child process supervision.
//!
//! [`ProcessSupervisor::start`] spawns a dev server with piped output and
//! hands back a [`ProcessHandle`]. Background tasks stream both pipes into
//! an [`OutputBuffer`] and the log file, and a waiter task records the exit
//! exactly once. [`ProcessSupervisor::stop`] runs the two-phase shutdown.

pub mod output;
pub mod terminator;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::CommandLine;
use crate::{AppError, Result};

pub use output::{LogSink, OutputBuffer, OutputLine, StreamKind};
pub use terminator::{platform_terminator, Terminator};

/// How long the exit report waits for the pipe readers to catch up.
///
/// Grandchildren that inherited the pipes can hold them open indefinitely;
/// the readers keep running past this window and append late lines.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// How long `stop` waits for the exit to be observed after the forceful phase.
pub const REAP_WINDOW: Duration = Duration::from_secs(1);

/// Everything needed to launch one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program and arguments.
    pub command: CommandLine,
    /// Working directory.
    pub cwd: PathBuf,
    /// Variables merged over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Append-only log file receiving every output line.
    pub log_path: PathBuf,
}

/// Exit observation shared between the waiter task and observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitState {
    /// Set once, never cleared.
    pub exited: bool,
    /// Exit code; `None` while running, on signal death, or on spawn failure.
    pub code: Option<i32>,
}

/// How a stop request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited; nothing was sent.
    AlreadyExited,
    /// The process exited within the grace period.
    Graceful,
    /// The process needed the forceful phase.
    Forced,
    /// The forceful phase ran but the exit was never observed.
    Unconfirmed,
}

#[derive(Debug)]
struct Shared {
    output: OutputBuffer,
    log: LogSink,
    exit_tx: watch::Sender<ExitState>,
}

impl Shared {
    fn record(&self, stream: StreamKind, text: &str) {
        self.log.write_line(stream, text);
        self.output.push(stream, text);
    }

    fn mark_exited(&self, code: Option<i32>) -> bool {
        self.exit_tx.send_if_modified(|state| {
            if state.exited {
                false
            } else {
                *state = ExitState { exited: true, code };
                true
            }
        })
    }
}

/// Read-only view of a supervised child, cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct ProcessObserver {
    shared: Arc<Shared>,
}

impl ProcessObserver {
    /// Captured output.
    #[must_use]
    pub fn output(&self) -> &OutputBuffer {
        &self.shared.output
    }

    /// Log file path.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        self.shared.log.path()
    }

    /// Current exit observation.
    #[must_use]
    pub fn exit_state(&self) -> ExitState {
        *self.shared.exit_tx.borrow()
    }

    /// Whether the child has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit_state().exited
    }

    /// Exit code, once known.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_state().code
    }

    /// Receiver that changes exactly once, when the child exits.
    #[must_use]
    pub fn subscribe_exit(&self) -> watch::Receiver<ExitState> {
        self.shared.exit_tx.subscribe()
    }

    /// Wait up to `timeout` for the exit; `true` if it was observed.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_exit();
        let observed = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| state.exited)).await,
            Ok(Ok(_))
        );
        observed
    }
}

/// A spawned child process.
///
/// Dropping the handle kills the child and its process group.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    command: CommandLine,
    cwd: PathBuf,
    observer: ProcessObserver,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessHandle {
    /// Operating system process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Command that was launched.
    #[must_use]
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Working directory of the child.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Read-only view for concurrent observers.
    #[must_use]
    pub fn observer(&self) -> &ProcessObserver {
        &self.observer
    }

    /// Whether the child has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.observer.has_exited()
    }

    /// Exit code, once known.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.observer.exit_code()
    }

    fn request_kill(&self) {
        let sender = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

/// Spawns and stops dev server processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    terminator: Arc<dyn Terminator>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(platform_terminator())
    }
}

impl ProcessSupervisor {
    /// Supervisor using the given kill strategy.
    #[must_use]
    pub fn new(terminator: Arc<dyn Terminator>) -> Self {
        Self { terminator }
    }

    /// Spawn the child described by `spec`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if the log file cannot be opened.
    /// - `AppError::Spawn` if the OS refuses to start the program; an
    ///   `error` line is written to the log first.
    pub fn start(&self, spec: LaunchSpec) -> Result<ProcessHandle> {
        let log = LogSink::open(&spec.log_path)?;
        let mut cmd = build_command(&spec);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let msg = format!("failed to spawn `{}`: {err}", spec.command);
                log.write_line(StreamKind::Error, &msg);
                return Err(AppError::Spawn(msg));
            }
        };
        let Some(pid) = child.id() else {
            let msg = format!("`{}` exited before its pid was read", spec.command);
            log.write_line(StreamKind::Error, &msg);
            return Err(AppError::Spawn(msg));
        };

        info!(pid, command = %spec.command, cwd = %spec.cwd.display(), "child spawned");

        let (exit_tx, _) = watch::channel(ExitState::default());
        let shared = Arc::new(Shared {
            output: OutputBuffer::new(),
            log,
            exit_tx,
        });

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, StreamKind::Stdout, Arc::clone(&shared))));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, StreamKind::Stderr, Arc::clone(&shared))));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(
            child,
            pid,
            kill_rx,
            pumps,
            Arc::clone(&shared),
            Arc::clone(&self.terminator),
        ));

        Ok(ProcessHandle {
            pid,
            command: spec.command,
            cwd: spec.cwd,
            observer: ProcessObserver { shared },
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    /// Two-phase stop: graceful request, then forceful kill after `grace`.
    ///
    /// Resolves once the exit is observed or shortly after the forceful
    /// phase. Never hangs, and is a no-op for an exited child.
    pub async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> StopOutcome {
        if handle.has_exited() {
            return StopOutcome::AlreadyExited;
        }
        let pid = handle.pid();

        if let Err(err) = self.terminator.terminate(pid, false).await {
            warn!(pid, %err, "graceful terminate failed");
        }
        if handle.observer().wait_for_exit(grace).await {
            debug!(pid, "child exited within grace period");
            return StopOutcome::Graceful;
        }

        warn!(
            pid,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "child ignored graceful terminate; escalating to forceful kill"
        );
        if let Err(err) = self.terminator.terminate(pid, true).await {
            warn!(pid, %err, "forceful terminate failed");
        }
        handle.request_kill();

        if handle.observer().wait_for_exit(REAP_WINDOW).await {
            StopOutcome::Forced
        } else {
            warn!(pid, "exit not observed after forceful kill");
            StopOutcome::Unconfirmed
        }
    }
}

fn build_command(spec: &LaunchSpec) -> Command {
    // Package managers ship as `.cmd` shims on Windows and need the shell.
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&spec.command.program);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = Command::new(&spec.command.program);

    cmd.args(&spec.command.args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

async fn pump<R>(reader: R, stream: StreamKind, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                shared.record(stream, text.trim_end_matches(&['\r', '\n'][..]));
            }
            Err(err) => {
                shared.record(
                    StreamKind::Error,
                    &format!("{} read failed: {err}", stream.tag()),
                );
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    terminator: Arc<dyn Terminator>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        sent = kill_rx => {
            if sent.is_err() {
                // Handle dropped without a stop; take the whole group down.
                let _ = terminator.terminate(pid, true).await;
            }
            if let Err(err) = child.start_kill() {
                debug!(pid, %err, "start_kill failed");
            }
            child.wait().await
        }
    };

    // One window for both readers; they run as independent tasks.
    let _ = tokio::time::timeout(DRAIN_WINDOW, async {
        for pump in pumps {
            let _ = pump.await;
        }
    })
    .await;

    let code = match status {
        Ok(status) => {
            shared.record(StreamKind::Exit, &describe_exit(&status));
            status.code()
        }
        Err(err) => {
            shared.record(StreamKind::Error, &format!("wait failed: {err}"));
            None
        }
    };
    if shared.mark_exited(code) {
        info!(pid, ?code, "child exited");
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("code={code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal={signal}");
        }
    }
    "code=unknown".to_owned()
}
