//! swtpm, a software TPM 2.0 behind a control socket.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use qsession_core::error::Result;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use super::process::ManagedProcess;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct SoftwareTpm {
    process: ManagedProcess,
    socket_path: PathBuf,
    state_dir: PathBuf,
}

impl SoftwareTpm {
    pub async fn start(
        binary: &Path,
        socket_path: &Path,
        state_dir: &Path,
        verbose: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        std::fs::remove_file(socket_path).ok();

        let mut command = Command::new(binary);
        command
            .args(["socket", "--tpm2", "--terminate"])
            .arg("--tpmstate")
            .arg(format!("dir={}", state_dir.display()))
            .arg("--ctrl")
            .arg(format!("type=unixio,path={}", socket_path.display()))
            .stdin(Stdio::null());
        if verbose {
            command.args(["--log", "level=20"]);
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut process = ManagedProcess::spawn("swtpm", &mut command)?;
        if let Err(e) = process.wait_for_path(socket_path, SOCKET_TIMEOUT).await {
            process.terminate().await;
            return Err(e);
        }

        tracing::info!(
            pid = process.pid(),
            socket = %socket_path.display(),
            state = %state_dir.display(),
            "swtpm started"
        );

        Ok(Self {
            process,
            socket_path: socket_path.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn process_mut(&mut self) -> &mut ManagedProcess {
        &mut self.process
    }

    pub async fn terminate(&mut self) {
        self.process.terminate().await;
        std::fs::remove_file(&self.socket_path).ok();
    }
}

/// Persistent TPM state directory for an image: `<home>/tpm/<id>`, where
/// `<id>` is the first 16 hex digits of SHA-256 over the image path.
pub fn persistent_state_dir(home: &Path, image: &Path) -> PathBuf {
    let absolute = std::fs::canonicalize(image).unwrap_or_else(|_| image.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    home.join("tpm").join(&hex::encode(digest)[..16])
}
