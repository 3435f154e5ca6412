//! qsession Core - Foundational Types
//!
//! Configuration, error taxonomy, network value types and the pure guest
//! watchdog protocol shared by the runtime, the watchdog process and the CLI.

pub mod config;
pub mod error;
pub mod network;
pub mod watchdog;

// Re-export commonly used types
pub use config::{
    parse_memory, Acceleration, Architecture, SessionConfig, ToolPaths, WatchdogSettings,
};
pub use error::{Result, SessionError};
pub use network::{parse_forward_rules, MacAddress, PortForwardRule, SSH_GUEST_PORT};
pub use watchdog::{parse_line, LineBuffer, WatchdogCommand, WatchdogState};

/// qsession version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
