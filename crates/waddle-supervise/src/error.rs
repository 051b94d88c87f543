use std::path::PathBuf;

use thiserror::Error;

use crate::cancel::Cause;

/// Errors returned by the supervision primitives.
///
/// Everything except [`SuperviseError::Initialization`] and
/// [`SuperviseError::Report`] is structural: retrying the same launch cannot
/// succeed, so none of these are retried by the supervisor loop.
#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("environment key must not be empty")]
    EmptyEnvKey,

    #[error("environment value must not be empty")]
    EmptyEnvValue,

    #[error("invalid supervisor options: {0}")]
    InvalidOptions(String),

    #[error("failed to lookup current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("failed to open readiness endpoint: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to start process {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not set session id: {0}")]
    Detach(#[source] nix::Error),

    #[error("background process failed to initialize: {0}")]
    Initialization(Cause),

    #[error("failed to deliver readiness report: {0}")]
    Report(#[from] reqwest::Error),
}

impl SuperviseError {
    /// Whether the error came from bad input rather than the environment.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            SuperviseError::EmptyEnvKey
                | SuperviseError::EmptyEnvValue
                | SuperviseError::InvalidOptions(_)
        )
    }
}
