//! Self-monitoring auto-restart loop.
//!
//! Each attempt spawns the child with the readiness address in its
//! environment, then races the child's exit against its readiness report:
//!
//! - failure report, or exit before any report: backoff, then restart
//! - ready: reset the backoff and wait until the child dies or the outer
//!   token is cancelled
//!
//! Cancelling the outer token stops new attempts and shuts the current child
//! down through its per-attempt token.

use std::process::Stdio;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::cancel::{Cause, CauseToken};
use crate::error::SuperviseError;
use crate::options::SupervisorOptions;
use crate::process::{self, ChildCommand};
use crate::readiness::ReadinessReceiver;
use crate::role::Role;

/// How [`Supervisor::run`] finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supervision {
    /// This process is the supervised child; carry on with the application.
    Child,
    /// The outer token was cancelled with this cause and the child is gone.
    Stopped(Cause),
}

/// Restarts a copy of the current program until cancelled.
#[derive(Debug, Clone)]
pub struct Supervisor {
    env_key: String,
    options: SupervisorOptions,
    command: Option<ChildCommand>,
}

impl Supervisor {
    /// Create a supervisor for the relationship named by `env_key`.
    ///
    /// Fails if `env_key` is empty or the options are inconsistent.
    pub fn new(
        env_key: impl Into<String>,
        options: SupervisorOptions,
    ) -> Result<Self, SuperviseError> {
        let env_key = env_key.into();
        if env_key.is_empty() {
            return Err(SuperviseError::EmptyEnvKey);
        }
        let options = options.normalized();
        options.validate()?;
        Ok(Self {
            env_key,
            options,
            command: None,
        })
    }

    /// Supervise `command` instead of re-executing the current binary.
    pub fn with_command(mut self, command: ChildCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn env_key(&self) -> &str {
        &self.env_key
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Resolve the role from the environment and supervise if top-level.
    pub async fn run(&self, token: &CauseToken) -> Result<Supervision, SuperviseError> {
        let role = Role::from_env(&self.env_key)?;
        self.run_as(&role, token).await
    }

    /// Supervise according to an already resolved role.
    ///
    /// A [`Role::Supervised`] process returns [`Supervision::Child`] at once.
    pub async fn run_as(
        &self,
        role: &Role,
        token: &CauseToken,
    ) -> Result<Supervision, SuperviseError> {
        if role.is_supervised() {
            return Ok(Supervision::Child);
        }

        let tracker = TaskTracker::new();
        let result = self.restart_loop(token, &tracker).await;

        tracker.close();
        tracker.wait().await;

        result?;
        Ok(Supervision::Stopped(token.cause().unwrap_or(Cause::Canceled)))
    }

    async fn restart_loop(
        &self,
        token: &CauseToken,
        tracker: &TaskTracker,
    ) -> Result<(), SuperviseError> {
        let mut attempt: u32 = 0;

        while !token.is_cancelled() {
            let command = match &self.command {
                Some(command) => command.clone(),
                None => ChildCommand::current()?,
            };

            let child_token = token.child();
            let receiver = ReadinessReceiver::open(token).await?;

            let mut cmd = command.to_command();
            cmd.env(&self.env_key, receiver.address())
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|source| SuperviseError::Spawn {
                program: command.program().to_path_buf(),
                source,
            })?;
            let pid = child.id();
            info!(pid, argv = ?command.argv(), "Started child");

            tracker.spawn(process::watch(
                child,
                child_token.clone(),
                self.options.shutdown_signal,
                self.options.shutdown_timeout,
            ));

            match receiver.wait(&child_token).await {
                Err(cause) => {
                    child_token.cancel_with(cause.clone());

                    let delay = self.options.backoff(attempt);
                    warn!(
                        pid,
                        cause = %cause,
                        delay = ?delay,
                        argv = ?command.argv(),
                        "Waiting before attempting to restart the child"
                    );

                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
                Ok(()) => {
                    attempt = 0;
                    info!(pid, "Child is initialized successfully");

                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = child_token.cancelled() => {}
                    }
                }
            }

            child_token.cancel();
            receiver.release();
        }

        Ok(())
    }
}

/// Supervise the current program under `env_key` until `token` is cancelled.
///
/// The child gets the readiness address in `env_key` and should report to it
/// with [`report_from_env`](crate::report_from_env) once initialized.
pub async fn supervise(
    token: &CauseToken,
    env_key: &str,
    options: SupervisorOptions,
) -> Result<Supervision, SuperviseError> {
    Supervisor::new(env_key, options)?.run(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_key_is_rejected() {
        let err = Supervisor::new("", SupervisorOptions::default()).unwrap_err();
        assert!(matches!(err, SuperviseError::EmptyEnvKey));
    }

    #[test]
    fn test_inverted_backoff_is_rejected() {
        let options = SupervisorOptions {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        let err = Supervisor::new("APP_MONITOR", options).unwrap_err();
        assert!(matches!(err, SuperviseError::InvalidOptions(_)));
    }

    #[test]
    fn test_options_are_normalized() {
        let options = SupervisorOptions {
            shutdown_timeout: Duration::ZERO,
            ..Default::default()
        };
        let supervisor = Supervisor::new("APP_MONITOR", options).unwrap();
        assert_eq!(supervisor.options().shutdown_timeout, Duration::from_secs(10));
        assert_eq!(supervisor.env_key(), "APP_MONITOR");
    }

    #[tokio::test]
    async fn test_supervised_role_returns_immediately() {
        let supervisor = Supervisor::new("APP_MONITOR", SupervisorOptions::default())
            .unwrap()
            .with_command(ChildCommand::new("/nonexistent/should-not-run"));
        let role = Role::Supervised {
            value: "http://127.0.0.1:1".into(),
        };

        let outcome = supervisor.run_as(&role, &CauseToken::new()).await.unwrap();
        assert_eq!(outcome, Supervision::Child);
    }

    #[tokio::test]
    async fn test_cancelled_token_spawns_nothing() {
        let supervisor = Supervisor::new("APP_MONITOR", SupervisorOptions::default())
            .unwrap()
            .with_command(ChildCommand::new("/nonexistent/should-not-run"));
        let token = CauseToken::new();
        token.cancel_with(Cause::Shutdown("early".into()));

        let outcome = supervisor.run_as(&Role::Supervisor, &token).await.unwrap();
        assert_eq!(outcome, Supervision::Stopped(Cause::Shutdown("early".into())));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let supervisor = Supervisor::new("APP_MONITOR", SupervisorOptions::default())
            .unwrap()
            .with_command(ChildCommand::new("/nonexistent/waddle-supervise-child"));

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run_as(&Role::Supervisor, &CauseToken::new()),
        )
        .await
        .expect("spawn failure is not retried")
        .unwrap_err();
        assert!(matches!(err, SuperviseError::Spawn { .. }));
    }
}
