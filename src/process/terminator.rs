//! Platform kill strategies behind one interface.
//!
//! POSIX children run in their own process group, so signalling the group
//! reaches every grandchild a package manager spawns. Windows has no groups
//! to signal; `taskkill /T` walks the process tree instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::Result;

/// Boxed future returned by [`Terminator::terminate`].
pub type TerminateFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Delivers a termination request to a supervised process and its children.
pub trait Terminator: Send + Sync + std::fmt::Debug {
    /// Ask `pid` (and its descendants) to exit; `forceful` skips any grace.
    ///
    /// A target that no longer exists is not an error.
    fn terminate(&self, pid: u32, forceful: bool) -> TerminateFuture<'_>;
}

/// Terminator for the current platform.
#[must_use]
pub fn platform_terminator() -> Arc<dyn Terminator> {
    #[cfg(unix)]
    {
        Arc::new(ProcessGroupTerminator)
    }
    #[cfg(windows)]
    {
        Arc::new(TreeKillTerminator)
    }
}

/// `SIGTERM` / `SIGKILL` to the whole process group.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupTerminator;

#[cfg(unix)]
impl Terminator for ProcessGroupTerminator {
    fn terminate(&self, pid: u32, forceful: bool) -> TerminateFuture<'_> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        Box::pin(async move {
            let raw = i32::try_from(pid)
                .map_err(|_| crate::AppError::Io(format!("pid {pid} out of range")))?;
            let signal = if forceful {
                Signal::SIGKILL
            } else {
                Signal::SIGTERM
            };
            match killpg(Pid::from_raw(raw), signal) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(err) => Err(crate::AppError::Io(format!(
                    "killpg({raw}, {signal:?}) failed: {err}"
                ))),
            }
        })
    }
}

/// `taskkill /T` (graceful) or `taskkill /T /F` (forceful).
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeKillTerminator;

#[cfg(windows)]
impl Terminator for TreeKillTerminator {
    fn terminate(&self, pid: u32, forceful: bool) -> TerminateFuture<'_> {
        Box::pin(async move {
            let pid_arg = pid.to_string();
            let mut args = vec!["/T"];
            if forceful {
                args.push("/F");
            }
            args.extend(["/PID", pid_arg.as_str()]);
            let output = tokio::process::Command::new("taskkill")
                .args(&args)
                .output()
                .await
                .map_err(|err| crate::AppError::Io(format!("taskkill failed to run: {err}")))?;
            if !output.status.success() {
                // Exit code 128 means the process is already gone.
                tracing::debug!(
                    pid,
                    forceful,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "taskkill reported failure"
                );
            }
            Ok(())
        })
    }
}
