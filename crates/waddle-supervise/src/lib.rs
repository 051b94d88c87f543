//! # waddle-supervise
//!
//! Self-supervision for long-running Waddle processes.
//!
//! ## Overview
//!
//! A single binary can act as its own supervisor:
//! 1. The top-level instance re-executes itself as a monitored child, marking
//!    the child through an application-chosen environment variable
//! 2. The child performs its initialization and reports "ready" (or a failure
//!    message) to a one-shot HTTP endpoint whose address it found in that
//!    variable
//! 3. The supervisor restarts the child with exponential backoff whenever it
//!    fails to initialize or dies, and resets the backoff once it is ready
//! 4. Cancelling the supervisor's [`CauseToken`] sends the shutdown signal to
//!    the child and kills it if it outlives the grace timeout
//!
//! [`daemonize`] is the detached variant: it starts a background copy of the
//! current program in its own session with a minimal environment and, if
//! asked, blocks until that copy reports readiness.
//!
//! ## Environment Variables
//!
//! - `WADDLE_SUPERVISE_SHUTDOWN_SIGNAL`: Signal sent to the child on shutdown (default: `SIGINT`)
//! - `WADDLE_SUPERVISE_SHUTDOWN_TIMEOUT_SECS`: Grace period before `SIGKILL` (default: 10)
//! - `WADDLE_SUPERVISE_MIN_BACKOFF_MS`: First restart delay (default: 1000)
//! - `WADDLE_SUPERVISE_MAX_BACKOFF_MS`: Restart delay cap (default: 60000)
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other platforms.

#[cfg(not(unix))]
compile_error!("waddle-supervise requires a Unix platform (Linux or macOS)");

mod cancel;
mod daemon;
mod error;
mod options;
mod process;
mod readiness;
mod role;
mod supervisor;
pub mod telemetry;

pub use cancel::{Cause, CauseToken};
pub use daemon::{daemonize, Launch};
pub use error::SuperviseError;
pub use options::SupervisorOptions;
pub use process::{ChildCommand, ExitReport};
pub use readiness::{report, report_from_env, InitStatus, ReadinessReceiver, ReadyCheck};
pub use role::Role;
pub use supervisor::{supervise, Supervision, Supervisor};

/// Result alias used throughout the crate.
pub type Result<T, E = SuperviseError> = std::result::Result<T, E>;
