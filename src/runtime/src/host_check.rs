//! Host virtualization support detection.
//!
//! Decides which accelerator the hypervisor runs with:
//! - Linux: KVM (/dev/kvm)
//! - macOS: Hypervisor.framework
//! - anything else, or a foreign guest architecture: TCG

use qsession_core::config::{Acceleration, Architecture};
use qsession_core::error::{Result, SessionError};

/// Hardware accelerator available on this host.
#[derive(Debug, Clone)]
pub struct VirtualizationSupport {
    pub accel: Acceleration,
    /// Human-readable description of the virtualization backend.
    pub details: String,
}

/// Check if the current host supports hardware virtualization.
///
/// Returns `Ok(VirtualizationSupport)` if supported, or an error explaining why not.
pub fn check_virtualization_support() -> Result<VirtualizationSupport> {
    #[cfg(target_os = "macos")]
    {
        check_macos_hypervisor()
    }

    #[cfg(target_os = "linux")]
    {
        check_linux_kvm()
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Err(SessionError::ConfigError(
            "no hardware accelerator on this platform".to_string(),
        ))
    }
}

/// Resolve the acceleration preference for a guest of `arch`.
///
/// `Auto` never fails: without a usable accelerator it falls back to TCG.
/// An explicit `kvm` or `hvf` the host cannot provide is an error.
pub fn resolve_acceleration(requested: Acceleration, arch: Architecture) -> Result<Acceleration> {
    let native = Architecture::host().map(|host| host == arch).unwrap_or(false);
    let support = if native {
        check_virtualization_support()
    } else {
        Err(SessionError::ConfigError(format!(
            "hardware acceleration cannot run a {} guest on a {} host",
            arch,
            std::env::consts::ARCH
        )))
    };
    resolve_with(requested, support)
}

fn resolve_with(
    requested: Acceleration,
    support: Result<VirtualizationSupport>,
) -> Result<Acceleration> {
    match (requested, support) {
        (Acceleration::Tcg, _) => Ok(Acceleration::Tcg),
        (Acceleration::Auto, Ok(support)) => {
            tracing::debug!(
                accel = %support.accel,
                details = %support.details,
                "Using hardware acceleration"
            );
            Ok(support.accel)
        }
        (Acceleration::Auto, Err(e)) => {
            tracing::warn!(reason = %e, "Hardware acceleration unavailable, falling back to tcg");
            Ok(Acceleration::Tcg)
        }
        (wanted, Ok(support)) if wanted == support.accel => Ok(wanted),
        (wanted, Ok(support)) => Err(SessionError::ConfigError(format!(
            "acceleration '{}' requested but this host provides '{}'",
            wanted, support.accel
        ))),
        (wanted, Err(e)) => Err(SessionError::ConfigError(format!(
            "acceleration '{}' requested but unavailable: {}",
            wanted, e
        ))),
    }
}

/// Check for Hypervisor.framework support on macOS.
#[cfg(target_os = "macos")]
fn check_macos_hypervisor() -> Result<VirtualizationSupport> {
    // "kern.hv_support: 1" (supported) or "0" (not supported)
    let output = std::process::Command::new("sysctl")
        .arg("kern.hv_support")
        .output()
        .map_err(|e| SessionError::Other(format!("Failed to run sysctl: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.split(':').nth(1).map(|s| s.trim()).unwrap_or("0");

    if output.status.success() && value == "1" {
        Ok(VirtualizationSupport {
            accel: Acceleration::Hvf,
            details: "Hypervisor.framework is available".to_string(),
        })
    } else {
        Err(SessionError::ConfigError(
            "Hypervisor.framework is not available on this system".to_string(),
        ))
    }
}

/// Check for KVM support on Linux.
#[cfg(target_os = "linux")]
fn check_linux_kvm() -> Result<VirtualizationSupport> {
    use std::path::Path;

    let kvm_path = Path::new("/dev/kvm");

    if !kvm_path.exists() {
        return Err(SessionError::ConfigError(
            "KVM is not available: /dev/kvm not found. \
             Ensure KVM kernel modules are loaded (modprobe kvm kvm_intel or kvm_amd)."
                .to_string(),
        ));
    }

    match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(kvm_path)
    {
        Ok(_) => Ok(VirtualizationSupport {
            accel: Acceleration::Kvm,
            details: "Linux KVM hardware virtualization is available".to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(SessionError::ConfigError(format!(
                "KVM access denied: {}. Add your user to the 'kvm' group: \
                 sudo usermod -aG kvm $USER",
                e
            )))
        }
        Err(e) => Err(SessionError::ConfigError(format!(
            "Failed to access /dev/kvm: {}",
            e
        ))),
    }
}
