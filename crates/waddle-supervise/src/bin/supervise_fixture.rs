//! Controllable child process for the supervision integration tests.
//!
//! Behavior, in order:
//! - Appends `start <pid> <unix-millis>` to the events file
//! - `--exit-code C`: exits with C before reporting anything
//! - `--fail-first N --counter PATH`: bumps the counter in PATH and reports
//!   a failure while it is <= N, then waits for shutdown
//! - `--fail-from N --counter PATH`: likewise reports a failure once the
//!   counter reaches N
//! - `--never-ready`: waits for shutdown without reporting
//! - Otherwise reports ready, then exits with 3 after `--exit-after-ready MS`
//!   or waits for shutdown
//!
//! Shutdown is SIGINT or SIGTERM (`shutdown` is recorded before exiting 0),
//! unless `--ignore-shutdown` is set, in which case only SIGKILL ends it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, Signal, SignalKind};
use waddle_supervise::{report_from_env, InitStatus};

#[derive(Parser)]
#[command(name = "supervise-fixture")]
struct Args {
    /// Environment variable holding the readiness address
    #[arg(long)]
    env_key: String,

    /// File that receives one line per lifecycle event
    #[arg(long)]
    events: Option<PathBuf>,

    #[arg(long)]
    exit_code: Option<i32>,

    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    #[arg(long)]
    fail_from: Option<u32>,

    /// Attempt counter shared across restarts
    #[arg(long)]
    counter: Option<PathBuf>,

    #[arg(long)]
    never_ready: bool,

    #[arg(long)]
    exit_after_ready: Option<u64>,

    #[arg(long)]
    ignore_shutdown: bool,
}

fn record(events: Option<&Path>, line: &str) -> Result<()> {
    let Some(path) = events else {
        return Ok(());
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn bump_counter(path: &Path) -> Result<u32> {
    let current = match std::fs::read_to_string(path) {
        Ok(text) => text.trim().parse().unwrap_or(0),
        Err(_) => 0,
    };
    let next = current + 1;
    std::fs::write(path, next.to_string())?;
    Ok(next)
}

async fn wait_for_shutdown(
    mut interrupt: Signal,
    mut terminate: Signal,
    events: Option<PathBuf>,
    ignore: bool,
) -> Result<()> {
    let events = events.as_deref();
    loop {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        if !ignore {
            record(events, "shutdown")?;
            return Ok(());
        }
        record(events, "ignored")?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let events = args.events.as_deref();

    // Install handlers first so an early shutdown signal is observed.
    let interrupt = signal(SignalKind::interrupt())?;
    let terminate = signal(SignalKind::terminate())?;
    let shutdown = tokio::spawn(wait_for_shutdown(
        interrupt,
        terminate,
        args.events.clone(),
        args.ignore_shutdown,
    ));

    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    record(events, &format!("start {} {}", std::process::id(), millis))?;

    if let Some(code) = args.exit_code {
        record(events, &format!("exit {code}"))?;
        std::process::exit(code);
    }

    let mut ready = !args.never_ready;
    if let Some(counter) = args.counter.as_deref() {
        let attempt = bump_counter(counter)?;
        let failing = attempt <= args.fail_first
            || args.fail_from.is_some_and(|from| attempt >= from);
        if failing {
            report_from_env(
                &args.env_key,
                InitStatus::Failed(format!("attempt {attempt} failed")),
            )
            .await?;
            record(events, "failed")?;
            ready = false;
        }
    }

    if ready {
        report_from_env(&args.env_key, InitStatus::Ready).await?;
        record(events, "ready")?;

        if let Some(ms) = args.exit_after_ready {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            record(events, "crash")?;
            std::process::exit(3);
        }
    }

    shutdown.await??;
    Ok(())
}
