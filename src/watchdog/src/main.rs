//! qsession Watchdog - guest health supervisor process.
//!
//! Spawned by the session orchestrator when the watchdog is enabled. Runs
//! independently of the orchestrator's wait on the hypervisor and talks to
//! it only through sockets: the guest channel it reads, and the QMP socket
//! it resets the guest through.
//!
//! # Usage
//! ```bash
//! qsession-watchdog --channel /tmp/qsession-x/watchdog.sock --qmp /tmp/qsession-x/qmp.sock
//! ```

#![allow(clippy::result_large_err)]

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use qsession_core::config::{DEFAULT_REARM_DELAY_SECS, DEFAULT_WATCHDOG_TIMEOUT_SECS};
use qsession_core::error::Result;
use qsession_runtime::watchdog::CHANNEL_POLL_INTERVAL;
use qsession_runtime::{QmpReset, SupervisorConfig, WatchdogSupervisor};
use tracing_subscriber::EnvFilter;

/// qsession guest health watchdog
#[derive(Parser, Debug)]
#[command(name = "qsession-watchdog")]
#[command(about = "Reset a guest that stops reporting health")]
struct Args {
    /// Host side of the guest health channel
    #[arg(long)]
    channel: PathBuf,

    /// Hypervisor QMP socket
    #[arg(long)]
    qmp: PathBuf,

    /// Timeout in seconds for a START without a count
    #[arg(long, default_value_t = DEFAULT_WATCHDOG_TIMEOUT_SECS)]
    default_timeout: u64,

    /// Seconds between resets while the guest stays unhealthy
    #[arg(
        long,
        default_value_t = DEFAULT_REARM_DELAY_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    rearm_delay: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Watchdog failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = SupervisorConfig {
        channel_path: args.channel,
        default_timeout: Duration::from_secs(args.default_timeout),
        rearm_delay: Duration::from_secs(args.rearm_delay),
        poll_interval: CHANNEL_POLL_INTERVAL,
    };

    tracing::info!(
        channel = %config.channel_path.display(),
        qmp = %args.qmp.display(),
        default_timeout_secs = args.default_timeout,
        rearm_delay_secs = args.rearm_delay,
        "Starting watchdog"
    );

    let mut supervisor = WatchdogSupervisor::new(config, QmpReset::new(args.qmp));
    let report = supervisor.run().await?;

    tracing::info!(
        resets = report.resets,
        failed_resets = report.failed_resets,
        "Watchdog channel closed, exiting"
    );
    Ok(())
}
