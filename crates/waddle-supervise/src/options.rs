//! Supervisor configuration.

use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::error::SuperviseError;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// User configurable values for the [`Supervisor`](crate::Supervisor).
///
/// Zero durations are treated as unset and replaced by the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Signal delivered to the child when its attempt is cancelled.
    pub shutdown_signal: Signal,
    /// How long the child may take to exit after the shutdown signal before
    /// it is killed.
    pub shutdown_timeout: Duration,
    /// Delay before the first restart.
    pub min_backoff: Duration,
    /// Upper bound for the restart delay.
    pub max_backoff: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            shutdown_signal: Signal::SIGINT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl SupervisorOptions {
    /// Load options from `WADDLE_SUPERVISE_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WADDLE_SUPERVISE_SHUTDOWN_SIGNAL`: `SIGTERM`, `TERM`, ... Default: `SIGINT`
    /// - `WADDLE_SUPERVISE_SHUTDOWN_TIMEOUT_SECS`: Default: 10
    /// - `WADDLE_SUPERVISE_MIN_BACKOFF_MS`: Default: 1000
    /// - `WADDLE_SUPERVISE_MAX_BACKOFF_MS`: Default: 60000
    pub fn from_env() -> Result<Self, SuperviseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SuperviseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(name) = non_empty(lookup("WADDLE_SUPERVISE_SHUTDOWN_SIGNAL")) {
            options.shutdown_signal = parse_signal(&name)?;
        }
        if let Some(secs) = non_empty(lookup("WADDLE_SUPERVISE_SHUTDOWN_TIMEOUT_SECS")) {
            options.shutdown_timeout =
                Duration::from_secs(parse_number("WADDLE_SUPERVISE_SHUTDOWN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(ms) = non_empty(lookup("WADDLE_SUPERVISE_MIN_BACKOFF_MS")) {
            options.min_backoff =
                Duration::from_millis(parse_number("WADDLE_SUPERVISE_MIN_BACKOFF_MS", &ms)?);
        }
        if let Some(ms) = non_empty(lookup("WADDLE_SUPERVISE_MAX_BACKOFF_MS")) {
            options.max_backoff =
                Duration::from_millis(parse_number("WADDLE_SUPERVISE_MAX_BACKOFF_MS", &ms)?);
        }

        let options = options.normalized();
        options.validate()?;
        Ok(options)
    }

    /// Replace zero durations with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT;
        }
        if self.min_backoff.is_zero() {
            self.min_backoff = DEFAULT_MIN_BACKOFF;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = DEFAULT_MAX_BACKOFF;
        }
        self
    }

    /// Check the options for consistency.
    pub fn validate(&self) -> Result<(), SuperviseError> {
        if self.max_backoff < self.min_backoff {
            return Err(SuperviseError::InvalidOptions(format!(
                "max backoff ({:?}) is smaller than min backoff ({:?})",
                self.max_backoff, self.min_backoff
            )));
        }
        Ok(())
    }

    /// Restart delay after `attempt` consecutive failures:
    /// `min(min_backoff * 2^attempt, max_backoff)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.min_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_signal(name: &str) -> Result<Signal, SuperviseError> {
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full)
        .map_err(|_| SuperviseError::InvalidOptions(format!("unknown shutdown signal: {name}")))
}

fn parse_number(key: &str, value: &str) -> Result<u64, SuperviseError> {
    value
        .parse()
        .map_err(|_| SuperviseError::InvalidOptions(format!("{key} is not a number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_defaults() {
        let options = SupervisorOptions::default();
        assert_eq!(options.shutdown_signal, Signal::SIGINT);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(options.min_backoff, Duration::from_secs(1));
        assert_eq!(options.max_backoff, Duration::from_secs(60));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_durations_take_defaults() {
        let options = SupervisorOptions {
            shutdown_signal: Signal::SIGTERM,
            shutdown_timeout: Duration::ZERO,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
        .normalized();
        assert_eq!(options.shutdown_signal, Signal::SIGTERM);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(options.min_backoff, Duration::from_secs(1));
        assert_eq!(options.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_max_below_min_is_rejected() {
        let options = SupervisorOptions {
            min_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(2),
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(err, SuperviseError::InvalidOptions(_)));
    }

    #[test]
    fn test_equal_bounds_are_valid() {
        let options = SupervisorOptions {
            min_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(3),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.backoff(0), Duration::from_secs(3));
        assert_eq!(options.backoff(4), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let options = SupervisorOptions {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            ..Default::default()
        };
        let delays: Vec<u64> = (0..6).map(|i| options.backoff(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_backoff_saturates_on_overflow() {
        let options = SupervisorOptions::default();
        assert_eq!(options.backoff(31), options.max_backoff);
        assert_eq!(options.backoff(32), options.max_backoff);
        assert_eq!(options.backoff(u32::MAX), options.max_backoff);
    }

    #[test]
    fn test_from_lookup_empty_environment() {
        let options = SupervisorOptions::from_lookup(|_| None).unwrap();
        assert_eq!(options, SupervisorOptions::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let options = SupervisorOptions::from_lookup(lookup(HashMap::from([
            ("WADDLE_SUPERVISE_SHUTDOWN_SIGNAL", "term"),
            ("WADDLE_SUPERVISE_SHUTDOWN_TIMEOUT_SECS", "3"),
            ("WADDLE_SUPERVISE_MIN_BACKOFF_MS", "250"),
            ("WADDLE_SUPERVISE_MAX_BACKOFF_MS", "4000"),
        ])))
        .unwrap();
        assert_eq!(options.shutdown_signal, Signal::SIGTERM);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(options.min_backoff, Duration::from_millis(250));
        assert_eq!(options.max_backoff, Duration::from_secs(4));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SupervisorOptions::from_lookup(lookup(HashMap::from([(
            "WADDLE_SUPERVISE_SHUTDOWN_SIGNAL",
            "SIGNOPE",
        )])))
        .unwrap_err();
        assert!(matches!(err, SuperviseError::InvalidOptions(_)));

        let err = SupervisorOptions::from_lookup(lookup(HashMap::from([(
            "WADDLE_SUPERVISE_MIN_BACKOFF_MS",
            "soon",
        )])))
        .unwrap_err();
        assert!(matches!(err, SuperviseError::InvalidOptions(_)));
    }

    #[test]
    fn test_from_lookup_rejects_inverted_bounds() {
        let err = SupervisorOptions::from_lookup(lookup(HashMap::from([
            ("WADDLE_SUPERVISE_MIN_BACKOFF_MS", "5000"),
            ("WADDLE_SUPERVISE_MAX_BACKOFF_MS", "1000"),
        ])))
        .unwrap_err();
        assert!(matches!(err, SuperviseError::InvalidOptions(_)));
    }
}
