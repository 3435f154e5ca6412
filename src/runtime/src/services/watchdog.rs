//! The `qsession-watchdog` process, forked for sessions with a watchdog.

use std::path::Path;
use std::process::Stdio;

use qsession_core::config::WatchdogSettings;
use qsession_core::error::Result;
use tokio::process::Command;

use super::process::ManagedProcess;

pub const WATCHDOG_BINARY: &str = "qsession-watchdog";

/// Name of the virtio-serial port the guest agent writes to.
pub const CHANNEL_NAME: &str = "org.qsession.watchdog";

#[derive(Debug)]
pub struct WatchdogProcess {
    process: ManagedProcess,
}

impl WatchdogProcess {
    /// Spawn the supervisor. It connects to `channel_path` on its own once
    /// the hypervisor has created it.
    pub fn start(
        binary: &Path,
        channel_path: &Path,
        qmp_path: &Path,
        settings: &WatchdogSettings,
        verbose: bool,
    ) -> Result<Self> {
        let mut command = Command::new(binary);
        command.args(watchdog_args(channel_path, qmp_path, settings, verbose));
        command.stdin(Stdio::null()).stdout(Stdio::null());
        if !verbose {
            command.stderr(Stdio::null());
        }

        let process = ManagedProcess::spawn("watchdog", &mut command)?;
        tracing::info!(
            pid = process.pid(),
            channel = %channel_path.display(),
            timeout_secs = settings.default_timeout_secs,
            "Watchdog supervisor started"
        );

        Ok(Self { process })
    }

    pub fn process_mut(&mut self) -> &mut ManagedProcess {
        &mut self.process
    }

    pub async fn terminate(&mut self) {
        self.process.terminate().await;
    }
}

fn watchdog_args(
    channel_path: &Path,
    qmp_path: &Path,
    settings: &WatchdogSettings,
    verbose: bool,
) -> Vec<String> {
    let mut args = vec![
        "--channel".to_string(),
        channel_path.display().to_string(),
        "--qmp".to_string(),
        qmp_path.display().to_string(),
        "--default-timeout".to_string(),
        settings.default_timeout_secs.to_string(),
        "--rearm-delay".to_string(),
        settings.rearm_delay_secs.to_string(),
    ];
    if verbose {
        args.push("--verbose".to_string());
    }
    args
}
