//! Running the current program in the background as a daemon.
//!
//! [`daemonize`] must be called early in both the foreground and the
//! background process, before opening databases, network connections, etc.
//! The background copy is started with the same arguments but a limited
//! environment (`PATH`, `USER`, `HOME` and the daemon key), standard streams
//! on `/dev/null`, and `/` as its working directory.

use std::ffi::OsString;
use std::process::Stdio;

use nix::sys::signal::Signal;
use tracing::{error, info};

use crate::cancel::{Cause, CauseToken};
use crate::error::SuperviseError;
use crate::process::{send_signal, ExitReport};
use crate::readiness::ReadyCheck;
use crate::role::Role;
use crate::telemetry;

/// Variables carried over into the background environment.
const INHERITED_VARS: [&str; 3] = ["PATH", "USER", "HOME"];

/// Which side of [`daemonize`] the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// The background process was started (and, if checked, initialized).
    /// The caller would normally exit now.
    Foreground,
    /// This is the background process; continue initializing and report
    /// readiness to the address in the daemon key.
    Background,
}

/// Start the current program in the background, or detach if this already
/// is the background copy.
///
/// `env_key` must be unset in the foreground environment; `env_value` is
/// whatever the background process should find in it, typically the address
/// of a [`ReadinessReceiver`](crate::ReadinessReceiver). When `check` is
/// given the foreground side waits on it; the token it gets is cancelled if
/// the background process dies. On a failed check the background process is
/// killed and the failure returned.
pub async fn daemonize(
    token: &CauseToken,
    env_key: &str,
    env_value: &str,
    check: Option<&dyn ReadyCheck>,
) -> Result<Launch, SuperviseError> {
    if env_key.is_empty() {
        return Err(SuperviseError::EmptyEnvKey);
    }
    if env_value.is_empty() {
        return Err(SuperviseError::EmptyEnvValue);
    }

    match Role::from_env(env_key)? {
        Role::Supervisor => {
            launch_background(token, env_key, env_value, check).await?;
            Ok(Launch::Foreground)
        }
        Role::Supervised { .. } => {
            detach()?;
            Ok(Launch::Background)
        }
    }
}

async fn launch_background(
    token: &CauseToken,
    env_key: &str,
    env_value: &str,
    check: Option<&dyn ReadyCheck>,
) -> Result<(), SuperviseError> {
    let program = std::env::current_exe().map_err(SuperviseError::CurrentExe)?;
    let mut args = std::env::args_os();
    let arg0 = args
        .next()
        .unwrap_or_else(|| program.clone().into_os_string());

    let mut cmd = tokio::process::Command::new(&program);
    cmd.arg0(arg0)
        .args(args)
        .env_clear()
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for var in INHERITED_VARS {
        cmd.env(var, std::env::var_os(var).unwrap_or_else(OsString::new));
    }
    cmd.env(env_key, env_value);

    let mut child = cmd.spawn().map_err(|source| SuperviseError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    info!(pid, program = %program.display(), "Started background process");

    // Cancelled with the exit reason as soon as the background process dies.
    let launch = token.child();
    let watcher = launch.clone();
    tokio::spawn(async move {
        let report = ExitReport::from_wait(child.wait().await);
        watcher.cancel_with(Cause::ChildExited(report));
    });

    let result = match check {
        None => Ok(()),
        Some(check) => match check.check(&launch).await {
            Ok(()) => {
                info!(pid, "Background process is initialized successfully");
                Ok(())
            }
            Err(cause) => {
                error!(pid, cause = %cause, "Could not initialize the background process");
                if let Some(pid) = pid {
                    send_signal(pid, Signal::SIGKILL);
                }
                Err(SuperviseError::Initialization(cause))
            }
        },
    };

    launch.cancel();
    result
}

/// Become a session leader without a controlling terminal and stop logging;
/// standard streams point at `/dev/null` anyway.
fn detach() -> Result<(), SuperviseError> {
    nix::unistd::setsid().map_err(SuperviseError::Detach)?;
    telemetry::silence();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let err = daemonize(&CauseToken::new(), "", "http://127.0.0.1:1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperviseError::EmptyEnvKey));
    }

    #[tokio::test]
    async fn test_empty_value_is_rejected() {
        let err = daemonize(&CauseToken::new(), "WADDLE_DAEMON_TEST_KEY", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperviseError::EmptyEnvValue));
        assert!(err.is_invalid_argument());
    }
}
