//! Child process ownership with graceful, idempotent termination.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use qsession_core::error::{Result, SessionError};
use tokio::process::{Child, Command};

/// Grace period between SIGTERM and SIGKILL.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval for readiness waits.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A spawned child process owned by exactly one session component.
#[derive(Debug)]
pub struct ManagedProcess {
    name: &'static str,
    pid: Option<u32>,
    child: Option<Child>,
}

impl ManagedProcess {
    /// Spawn `command`. The child is killed if the handle is dropped.
    pub fn spawn(name: &'static str, command: &mut Command) -> Result<Self> {
        let child = command
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::LaunchError {
                message: format!("Failed to spawn {}: {}", name, e),
                hint: None,
            })?;
        let pid = child.id();
        tracing::debug!(name, pid, "Spawned process");
        Ok(Self {
            name,
            pid,
            child: Some(child),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Exit status if the child already exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && self.try_exit_status().is_none()
    }

    /// Wait for the child to exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let child = self.child.as_mut().ok_or_else(|| {
            SessionError::Other(format!("{} was already terminated", self.name))
        })?;
        Ok(child.wait().await?)
    }

    /// Wait until `path` exists, failing if the child exits first or the
    /// timeout passes.
    pub async fn wait_for_path(&mut self, path: &Path, timeout: Duration) -> Result<()> {
        let start = tokio::time::Instant::now();
        loop {
            if path.exists() {
                return Ok(());
            }
            if let Some(status) = self.try_exit_status() {
                return Err(SessionError::LaunchError {
                    message: format!("{} exited during startup ({})", self.name, status),
                    hint: None,
                });
            }
            if start.elapsed() > timeout {
                return Err(SessionError::LaunchError {
                    message: format!(
                        "{} socket {} did not appear within {}s",
                        self.name,
                        path.display(),
                        timeout.as_secs()
                    ),
                    hint: None,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL.
    ///
    /// Never fails; a second call is a no-op.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(name = self.name, pid = self.pid, ?status, "Process already exited");
            return;
        }

        if let Some(pid) = self.pid {
            tracing::debug!(name = self.name, pid, "Sending SIGTERM");
            // SAFETY: the child has not been reaped, so the pid is still ours.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(
                    name = self.name,
                    pid = self.pid,
                    ?status,
                    "Process exited gracefully"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    name = self.name,
                    pid = self.pid,
                    error = %e,
                    "Error waiting for process, forcing kill"
                );
                let _ = child.kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    name = self.name,
                    pid = self.pid,
                    "Process did not exit gracefully, sending SIGKILL"
                );
                let _ = child.kill().await;
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.child.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_terminate_running_process() {
        let mut proc = ManagedProcess::spawn("sleeper", &mut sh("exec sleep 30")).unwrap();
        assert!(proc.is_running());
        let start = std::time::Instant::now();
        proc.terminate().await;
        assert!(start.elapsed() < GRACEFUL_SHUTDOWN_TIMEOUT);
        assert!(proc.is_terminated());
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_terminate_ignoring_sigterm_falls_back_to_kill() {
        let mut proc =
            ManagedProcess::spawn("stubborn", &mut sh("trap '' TERM; while :; do sleep 1; done"))
                .unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        proc.terminate().await;
        assert!(proc.is_terminated());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_after_exit() {
        let mut proc = ManagedProcess::spawn("short", &mut sh("exit 0")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        proc.terminate().await;
        proc.terminate().await;
        assert!(proc.is_terminated());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_launch_error() {
        let err =
            ManagedProcess::spawn("ghost", &mut Command::new("/nonexistent/ghost")).unwrap_err();
        assert!(matches!(err, SessionError::LaunchError { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_path_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ready.sock");
        let script = format!("sleep 0.2; touch '{}'; exec sleep 30", path.display());
        let mut proc = ManagedProcess::spawn("toucher", &mut sh(&script)).unwrap();
        proc.wait_for_path(&path, Duration::from_secs(5)).await.unwrap();
        proc.terminate().await;
    }

    #[tokio::test]
    async fn test_wait_for_path_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ManagedProcess::spawn("crasher", &mut sh("exit 3")).unwrap();
        let err = proc
            .wait_for_path(&dir.path().join("never.sock"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }

    #[tokio::test]
    async fn test_wait_for_path_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ManagedProcess::spawn("idle", &mut sh("exec sleep 30")).unwrap();
        let err = proc
            .wait_for_path(&dir.path().join("never.sock"), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not appear"));
        proc.terminate().await;
    }
}
