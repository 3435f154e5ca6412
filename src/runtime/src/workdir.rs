//! Per-session scratch directory for sockets and transient state.

use std::path::{Path, PathBuf};

use qsession_core::error::{Result, SessionError};

/// Persistent state root: `$QSESSION_HOME`, else `~/.qsession`.
pub fn state_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("QSESSION_HOME") {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir()
        .map(|h| h.join(".qsession"))
        .ok_or_else(|| SessionError::ConfigError("cannot determine home directory".to_string()))
}

/// A uniquely named temporary directory owned by one session.
///
/// Removed by [`EphemeralWorkDir::remove`] or, failing that, on drop.
#[derive(Debug)]
pub struct EphemeralWorkDir {
    path: PathBuf,
    dir: Option<tempfile::TempDir>,
}

impl EphemeralWorkDir {
    pub fn create() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("qsession-").tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created session work dir");
        Ok(Self {
            path,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hypervisor management socket.
    pub fn qmp_socket(&self) -> PathBuf {
        self.path.join("qmp.sock")
    }

    /// Host side of the guest health channel.
    pub fn watchdog_socket(&self) -> PathBuf {
        self.path.join("watchdog.sock")
    }

    pub fn tpm_socket(&self) -> PathBuf {
        self.path.join("tpm.sock")
    }

    pub fn tpm_state_dir(&self) -> PathBuf {
        self.path.join("tpm")
    }

    pub fn virtiofs_socket(&self) -> PathBuf {
        self.path.join("virtiofs.sock")
    }

    /// Remove the directory and everything in it. Safe to call repeatedly.
    pub fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if let Err(e) = dir.close() {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove work dir"
                );
            }
        }
    }

    pub fn is_removed(&self) -> bool {
        self.dir.is_none()
    }
}
