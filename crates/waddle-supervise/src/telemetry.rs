//! Logging setup for programs built on this crate.
//!
//! [`init`] installs a fmt subscriber whose filter can later be switched off
//! with [`silence`]; [`daemonize`](crate::daemonize) does that in the
//! background process.

use std::sync::OnceLock;

use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter,
    Registry,
};

/// Handle to the installed filter, stored for [`silence`].
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn default_filter() -> EnvFilter {
    EnvFilter::new("info")
}

fn build_log_filter() -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| default_filter());
    }

    if let Ok(level_or_filter) = std::env::var("WADDLE_LOG_LEVEL") {
        let level_or_filter = level_or_filter.trim();
        if !level_or_filter.is_empty() {
            return EnvFilter::try_new(level_or_filter).unwrap_or_else(|_| default_filter());
        }
    }

    default_filter()
}

/// Initialize console logging.
///
/// # Configuration
///
/// Environment variables:
/// - `RUST_LOG`: Log filter
/// - `WADDLE_LOG_LEVEL`: Level or filter used when `RUST_LOG` is unset (default: info)
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (filter, handle) = reload::Layer::new(build_log_filter());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Turn off all log output from the subscriber installed by [`init`].
///
/// Does nothing if [`init`] was not called.
pub fn silence() {
    if let Some(handle) = FILTER_HANDLE.get() {
        // Only fails if the subscriber is gone, in which case nothing logs.
        let _ = handle.modify(|filter| {
            *filter = EnvFilter::default().add_directive(LevelFilter::OFF.into());
        });
    }
}
