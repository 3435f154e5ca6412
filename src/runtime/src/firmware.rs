//! Firmware lookup for guests that need UEFI.

use std::path::{Path, PathBuf};

use qsession_core::config::Architecture;
use qsession_core::error::{Result, SessionError};

const AARCH64_FIRMWARE: &[&str] = &[
    "/usr/share/qemu-efi-aarch64/QEMU_EFI.fd",
    "/usr/share/AAVMF/AAVMF_CODE.fd",
    "/usr/share/edk2/aarch64/QEMU_EFI.fd",
    "/opt/homebrew/share/qemu/edk2-aarch64-code.fd",
    "/usr/local/share/qemu/edk2-aarch64-code.fd",
];

/// Resolve the firmware image for a guest.
///
/// Returns `None` when the hypervisor's built-in firmware is enough.
pub fn resolve_firmware(
    arch: Architecture,
    override_path: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let candidates: Vec<PathBuf> = match arch {
        Architecture::Aarch64 => AARCH64_FIRMWARE.iter().map(PathBuf::from).collect(),
        Architecture::X86_64 => Vec::new(),
    };
    find_firmware(arch, override_path, &candidates)
}

fn find_firmware(
    arch: Architecture,
    override_path: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        if !path.is_file() {
            return Err(SessionError::ConfigError(format!(
                "firmware not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    match arch {
        Architecture::X86_64 => Ok(None),
        Architecture::Aarch64 => candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                SessionError::ConfigError(
                    "no UEFI firmware found for aarch64 guest; install qemu-efi-aarch64 \
                     or pass --firmware"
                        .to_string(),
                )
            }),
    }
}
