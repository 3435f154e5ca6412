//! virtiofsd, exporting a host directory over vhost-user-fs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use qsession_core::error::{Result, SessionError};
use tokio::process::Command;

use super::process::ManagedProcess;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Mount tag the guest uses: `mount -t virtiofs hostshare /mnt`.
pub const MOUNT_TAG: &str = "hostshare";

#[derive(Debug)]
pub struct VirtiofsDaemon {
    process: ManagedProcess,
    socket_path: PathBuf,
}

impl VirtiofsDaemon {
    pub async fn start(
        binary: &Path,
        socket_path: &Path,
        shared_dir: &Path,
        verbose: bool,
    ) -> Result<Self> {
        if !shared_dir.is_dir() {
            return Err(SessionError::ConfigError(format!(
                "shared directory not found: {}",
                shared_dir.display()
            )));
        }
        std::fs::remove_file(socket_path).ok();

        let mut command = Command::new(binary);
        command
            .arg("--socket-path")
            .arg(socket_path)
            .arg("--shared-dir")
            .arg(shared_dir)
            .args(["--cache", "auto"])
            .stdin(Stdio::null());
        if verbose {
            command.args(["--log-level", "debug"]);
        } else {
            command
                .args(["--log-level", "error"])
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        let mut process = ManagedProcess::spawn("virtiofsd", &mut command)?;
        if let Err(e) = process.wait_for_path(socket_path, SOCKET_TIMEOUT).await {
            process.terminate().await;
            return Err(e);
        }

        tracing::info!(
            pid = process.pid(),
            socket = %socket_path.display(),
            shared_dir = %shared_dir.display(),
            "virtiofsd started"
        );

        Ok(Self {
            process,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn process_mut(&mut self) -> &mut ManagedProcess {
        &mut self.process
    }

    pub async fn terminate(&mut self) {
        self.process.terminate().await;
        std::fs::remove_file(&self.socket_path).ok();
    }
}
