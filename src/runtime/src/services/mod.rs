//! Auxiliary services started alongside the hypervisor.
//!
//! Each variant owns one child process plus the sockets or ports it
//! created. Teardown is a single `match`; terminating twice is a no-op.

mod file_server;
mod process;
mod swtpm;
mod virtiofsd;
mod watchdog;

pub use file_server::{parse_serving_port, FileServer, GUEST_ADDRESS, GUEST_PORT};
pub use process::{ManagedProcess, GRACEFUL_SHUTDOWN_TIMEOUT};
pub use swtpm::{persistent_state_dir, SoftwareTpm};
pub use virtiofsd::{VirtiofsDaemon, MOUNT_TAG};
pub use watchdog::{WatchdogProcess, CHANNEL_NAME, WATCHDOG_BINARY};

use std::fmt;

/// Kind tag for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    HttpFileServer,
    Virtiofsd,
    SoftwareTpm,
    Watchdog,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::HttpFileServer => write!(f, "file-server"),
            ServiceKind::Virtiofsd => write!(f, "virtiofsd"),
            ServiceKind::SoftwareTpm => write!(f, "swtpm"),
            ServiceKind::Watchdog => write!(f, "watchdog"),
        }
    }
}

#[derive(Debug)]
pub enum AuxiliaryService {
    HttpFileServer(FileServer),
    Virtiofsd(VirtiofsDaemon),
    SoftwareTpm(SoftwareTpm),
    Watchdog(WatchdogProcess),
}

impl AuxiliaryService {
    pub fn kind(&self) -> ServiceKind {
        match self {
            AuxiliaryService::HttpFileServer(_) => ServiceKind::HttpFileServer,
            AuxiliaryService::Virtiofsd(_) => ServiceKind::Virtiofsd,
            AuxiliaryService::SoftwareTpm(_) => ServiceKind::SoftwareTpm,
            AuxiliaryService::Watchdog(_) => ServiceKind::Watchdog,
        }
    }

    fn process_mut(&mut self) -> &mut ManagedProcess {
        match self {
            AuxiliaryService::HttpFileServer(s) => s.process_mut(),
            AuxiliaryService::Virtiofsd(s) => s.process_mut(),
            AuxiliaryService::SoftwareTpm(s) => s.process_mut(),
            AuxiliaryService::Watchdog(s) => s.process_mut(),
        }
    }

    pub fn is_terminated(&mut self) -> bool {
        self.process_mut().is_terminated()
    }

    /// Best-effort stop. Never fails.
    pub async fn terminate(&mut self) {
        if self.is_terminated() {
            return;
        }
        tracing::debug!(service = %self.kind(), "Stopping auxiliary service");
        match self {
            AuxiliaryService::HttpFileServer(s) => s.terminate().await,
            AuxiliaryService::Virtiofsd(s) => s.terminate().await,
            AuxiliaryService::SoftwareTpm(s) => s.terminate().await,
            AuxiliaryService::Watchdog(s) => s.terminate().await,
        }
    }
}
