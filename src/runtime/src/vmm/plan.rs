//! ResourcePlan - Everything the hypervisor is launched with.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use qsession_core::config::{Acceleration, Architecture};
use qsession_core::error::{Result, SessionError};
use qsession_core::network::{MacAddress, PortForwardRule};
use serde::{Deserialize, Serialize};

const QCOW2_MAGIC: [u8; 4] = *b"QFI\xfb";

/// On-disk format of the boot image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Qcow2,
    Raw,
}

impl DiskFormat {
    /// Sniff the format from the image header.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            SessionError::ConfigError(format!("disk image {}: {}", path.display(), e))
        })?;
        let mut magic = [0u8; 4];
        match file.read_exact(&mut magic) {
            Ok(()) if magic == QCOW2_MAGIC => Ok(DiskFormat::Qcow2),
            Ok(()) => Ok(DiskFormat::Raw),
            // Shorter than a header: can only be raw.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(DiskFormat::Raw),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskFormat::Qcow2 => write!(f, "qcow2"),
            DiskFormat::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImage {
    pub path: PathBuf,
    pub format: DiskFormat,
}

impl DiskImage {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SessionError::ConfigError(format!(
                "disk image not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            format: DiskFormat::detect(path)?,
        })
    }
}

/// Complete launch plan for the primary hypervisor process.
///
/// Produced during session build; rendered into a command line by
/// [`super::qemu::render_args`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub arch: Architecture,

    /// Resolved accelerator, never `Auto`.
    pub accel: Acceleration,

    pub memory_mib: u32,

    pub cpus: u32,

    /// UEFI / BIOS image, `None` for the hypervisor default.
    pub firmware: Option<PathBuf>,

    pub disk: DiskImage,

    /// Discard guest disk writes.
    pub snapshot: bool,

    pub no_graphics: bool,

    pub mac: MacAddress,

    /// Host-to-guest TCP forwards.
    pub forwards: Vec<PortForwardRule>,

    /// Guest-to-host forward for the file server, user-network syntax.
    pub guestfwd: Option<String>,

    /// Management socket.
    pub qmp_socket: PathBuf,

    /// Watchdog channel socket, served by the hypervisor.
    pub watchdog_channel: Option<PathBuf>,

    /// swtpm control socket.
    pub tpm_socket: Option<PathBuf>,

    /// virtiofsd vhost-user socket.
    pub virtiofs_socket: Option<PathBuf>,

    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_qcow2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.qcow2");
        std::fs::write(&path, b"QFI\xfb\x00\x00\x00\x03rest-of-header").unwrap();
        assert_eq!(DiskFormat::detect(&path).unwrap(), DiskFormat::Qcow2);
    }

    #[test]
    fn test_detect_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::write(&path, vec![0u8; 512]).unwrap();
        assert_eq!(DiskFormat::detect(&path).unwrap(), DiskFormat::Raw);

        let tiny = dir.path().join("tiny.img");
        std::fs::write(&tiny, b"QF").unwrap();
        assert_eq!(DiskFormat::detect(&tiny).unwrap(), DiskFormat::Raw);
    }

    #[test]
    fn test_open_missing_image() {
        let err = DiskImage::open(Path::new("/nonexistent/disk.qcow2")).unwrap_err();
        assert!(matches!(err, SessionError::ConfigError(_)));
        assert!(err.to_string().contains("disk image not found"));
    }

    #[test]
    fn test_disk_format_serde() {
        assert_eq!(serde_json::to_string(&DiskFormat::Qcow2).unwrap(), "\"qcow2\"");
    }
}
