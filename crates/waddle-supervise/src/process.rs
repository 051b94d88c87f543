//! Child process launch and reaping.
//!
//! A [`ChildCommand`] names what to re-execute (by default the current
//! binary with the current arguments). [`watch`] owns a spawned child: it
//! waits for it to exit, or on cancellation delivers the shutdown signal and
//! escalates to `SIGKILL` after the grace period.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::cancel::{Cause, CauseToken};
use crate::error::SuperviseError;

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitReport {
    #[error("could not wait on child process: {0}")]
    WaitFailed(String),

    /// Exit code 0. Still a failure for a process expected to run forever.
    #[error("child exited successfully with exit code 0")]
    Success,

    #[error("child is terminated by signal {0}")]
    Signaled(i32),

    #[error("child exited with exit code {0}")]
    Code(i32),
}

impl ExitReport {
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return ExitReport::Success;
        }
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitReport::Code(code),
            (None, Some(signo)) => ExitReport::Signaled(signo),
            (None, None) => ExitReport::WaitFailed(format!("unrecognized exit status: {status}")),
        }
    }

    pub fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self::from_status(status),
            Err(e) => ExitReport::WaitFailed(e.to_string()),
        }
    }
}

/// Program and arguments of a supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ChildCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The running binary with the arguments it was started with.
    ///
    /// argv[0] is replaced by the resolved executable path.
    pub fn current() -> Result<Self, SuperviseError> {
        let program = std::env::current_exe().map_err(SuperviseError::CurrentExe)?;
        Ok(Self {
            program,
            args: std::env::args_os().skip(1).collect(),
        })
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument vector, argv[0] included, for logging.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    /// A tokio command for this child with standard streams inherited.
    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Deliver `signal` to `pid`, treating an already-gone process as success.
pub(crate) fn send_signal(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, not signaling");
        return;
    };
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid, signal = ?signal, "Signaled child"),
        Err(Errno::ESRCH) => debug!(pid, "Child already exited"),
        Err(e) => warn!(pid, signal = ?signal, error = %e, "Failed to signal child"),
    }
}

/// Own `child` until it exits and record the exit on `attempt`.
///
/// Cancelling `attempt` sends `signal`; if the child is still alive after
/// `grace`, it is killed.
pub(crate) async fn watch(mut child: Child, attempt: CauseToken, signal: Signal, grace: Duration) {
    let pid = child.id();

    let exited = {
        let cancelled = attempt.cancelled();
        tokio::select! {
            status = child.wait() => Some(status),
            _ = cancelled => None,
        }
    };

    let status = match exited {
        Some(status) => status,
        None => shutdown(&mut child, signal, grace).await,
    };

    let report = ExitReport::from_wait(status);
    info!(pid, status = %report, "Child has died");
    attempt.cancel_with(Cause::ChildExited(report));
}

async fn shutdown(child: &mut Child, signal: Signal, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        send_signal(pid, signal);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                pid = child.id(),
                timeout = ?grace,
                "Child did not exit within shutdown timeout, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}
