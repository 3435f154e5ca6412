//! Stable host identity, used to derive a guest MAC that survives restarts.

use std::path::Path;
use std::process::Command;

use qsession_core::network::{MacAddress, MAC_PREFIX};
use sha2::{Digest, Sha256};

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const HOSTNAME_PATHS: &[&str] = &["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Where the host identity came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostIdentity {
    /// systemd / dbus machine id.
    MachineId(String),
    /// macOS IOPlatformUUID.
    PlatformUuid(String),
    /// Last resort.
    Hostname(String),
}

impl HostIdentity {
    /// Detect the identity of the current host, trying each source in order.
    pub fn detect() -> Self {
        for path in MACHINE_ID_PATHS {
            if let Some(id) = read_machine_id(Path::new(path)) {
                return HostIdentity::MachineId(id);
            }
        }

        if cfg!(target_os = "macos") {
            if let Some(uuid) = platform_uuid() {
                return HostIdentity::PlatformUuid(uuid);
            }
        }

        HostIdentity::Hostname(hostname())
    }

    pub fn as_str(&self) -> &str {
        match self {
            HostIdentity::MachineId(s)
            | HostIdentity::PlatformUuid(s)
            | HostIdentity::Hostname(s) => s,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            HostIdentity::MachineId(_) => "machine-id",
            HostIdentity::PlatformUuid(_) => "platform-uuid",
            HostIdentity::Hostname(_) => "hostname",
        }
    }
}

/// Derive the guest MAC for a host identity.
///
/// The first octet is fixed (locally administered, unicast); the other five
/// are the leading bytes of SHA-256 over the identity string.
pub fn derive_mac(identity: &str) -> MacAddress {
    let digest = Sha256::digest(identity.as_bytes());
    let mut octets = [0u8; 6];
    octets[0] = MAC_PREFIX;
    octets[1..].copy_from_slice(&digest[..5]);
    MacAddress(octets)
}

fn read_machine_id(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let id = content.trim();
    if id.is_empty() || id == "uninitialized" {
        return None;
    }
    Some(id.to_string())
}

fn platform_uuid() -> Option<String> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_platform_uuid(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the value of `"IOPlatformUUID" = "..."` from ioreg output.
fn parse_platform_uuid(ioreg: &str) -> Option<String> {
    ioreg
        .lines()
        .find(|line| line.contains("\"IOPlatformUUID\""))
        .and_then(|line| line.split('=').nth(1))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn hostname() -> String {
    hostname_from(HOSTNAME_PATHS).unwrap_or_else(|| "localhost".to_string())
}

/// First non-empty hostname from `paths`, then `$HOSTNAME` / `$HOST`.
fn hostname_from(paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .chain(std::env::var("HOSTNAME").ok())
        .chain(std::env::var("HOST").ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}
