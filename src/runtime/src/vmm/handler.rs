//! VmHandler - Runtime operations on the running hypervisor.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use qsession_core::error::Result;

use crate::services::ManagedProcess;

/// Handle on the primary hypervisor process.
///
/// Separates runtime operations (wait, stop) from spawning (`VmController`).
#[derive(Debug)]
pub struct VmHandler {
    process: ManagedProcess,
}

impl VmHandler {
    pub(crate) fn new(process: ManagedProcess) -> Self {
        Self { process }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    /// Block until the hypervisor exits and return its exit code.
    ///
    /// Cancel-safe, so it can race an interrupt in `select!`.
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.process.wait().await?;
        tracing::debug!(pid = self.pid(), ?status, "Hypervisor exited");
        Ok(exit_code(status))
    }

    /// SIGTERM, grace period, SIGKILL. No-op once stopped.
    pub async fn stop(&mut self) {
        self.process.terminate().await;
    }
}

/// Process exit code, or `128 + signal` for a signal death.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
