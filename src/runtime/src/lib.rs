//! qsession Runtime - VM session orchestration.
//!
//! Builds the resource plan for one QEMU session, starts the auxiliary
//! services and the hypervisor, supervises guest health, and tears
//! everything down when the session ends.

#![allow(clippy::result_large_err)]

pub mod binaries;
pub mod firmware;
pub mod host_check;
pub mod network;
pub mod port;
pub mod qmp;
pub mod services;
pub mod session;
pub mod vmm;
pub mod watchdog;
pub mod workdir;

// Re-export common types
pub use host_check::{check_virtualization_support, resolve_acceleration, VirtualizationSupport};
pub use network::{build_forward_table, derive_mac, HostIdentity, NetworkPlan};
pub use port::{PortAllocator, MAX_PROBE_ATTEMPTS};
pub use qmp::{execute_once, ControlPlaneClient, QmpCommand};
pub use services::{AuxiliaryService, ServiceKind};
pub use session::{InterruptSignal, Session, SessionPhase};
pub use vmm::{DiskFormat, ResourcePlan, VmController, VmHandler};
pub use watchdog::{QmpReset, ResetTrigger, SupervisorConfig, SupervisorReport, WatchdogSupervisor};
pub use workdir::{state_home, EphemeralWorkDir};

/// qsession runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
