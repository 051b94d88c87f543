//! Waddle Supervise - run a service in the background and/or under a
//! self-monitoring supervisor.
//!
//! ```bash
//! # Restart automatically on crash, stop with Ctrl-C
//! waddle-supervise --self-monitor
//!
//! # Detach into the background once initialized, keep restarting there
//! waddle-supervise --background --self-monitor
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use waddle_supervise::{
    daemonize, report_from_env, supervise, telemetry, Cause, CauseToken, InitStatus, Launch,
    ReadinessReceiver, ReadyCheck, Role, Supervision, SupervisorOptions,
};

const DAEMON_ENV_KEY: &str = "WADDLE_DAEMONIZE_ENVKEY";
const MONITOR_ENV_KEY: &str = "WADDLE_SELFMONITOR_ENVKEY";

#[derive(Parser)]
#[command(name = "waddle-supervise")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run in the background, detached from the terminal
    #[arg(long)]
    background: bool,

    /// Restart automatically when the service dies
    #[arg(long)]
    self_monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
    let cli = Cli::parse();

    let token = CauseToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel_with(Cause::Shutdown("interrupt".into()));
        }
    });

    if cli.background {
        // Only the foreground copy waits for readiness.
        let receiver = match Role::from_env(DAEMON_ENV_KEY)? {
            Role::Supervisor => Some(ReadinessReceiver::open(&token).await?),
            Role::Supervised { .. } => None,
        };
        let value = match &receiver {
            Some(receiver) => receiver.address().to_string(),
            None => std::env::var(DAEMON_ENV_KEY).unwrap_or_default(),
        };
        let check = receiver.as_ref().map(|r| r as &dyn ReadyCheck);

        let launch = daemonize(&token, DAEMON_ENV_KEY, &value, check)
            .await
            .context("Failed to start background process")?;
        if launch == Launch::Foreground {
            return Ok(());
        }
    }

    if cli.self_monitor {
        let options = SupervisorOptions::from_env()?;
        if let Supervision::Stopped(cause) = supervise(&token, MONITOR_ENV_KEY, options).await? {
            info!(cause = %cause, "Supervisor stopped");
            return Ok(());
        }
    }

    info!(pid = std::process::id(), "Service initialized");

    // Under --background --self-monitor the daemon key reaches restarted
    // children too, whose foreground process is long gone.
    for (enabled, key) in [(cli.background, DAEMON_ENV_KEY), (cli.self_monitor, MONITOR_ENV_KEY)] {
        if enabled {
            if let Err(e) = report_from_env(key, InitStatus::Ready).await {
                warn!(env_key = key, error = %e, "Could not report readiness");
            }
        }
    }

    token.cancelled().await;
    info!("Service shutting down");
    Ok(())
}
