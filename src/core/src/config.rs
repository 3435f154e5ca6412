use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SessionError};

/// Default guest memory in MiB.
pub const DEFAULT_MEMORY_MIB: u32 = 2048;

/// Default number of virtual CPUs.
pub const DEFAULT_CPUS: u32 = 2;

/// Default preferred host port for the SSH forward.
pub const DEFAULT_SSH_PORT: u16 = 2222;

/// Watchdog timeout used when the guest sends a bare `START`.
pub const DEFAULT_WATCHDOG_TIMEOUT_SECS: u64 = 30;

/// Delay before the next reset when a reset was already triggered.
pub const DEFAULT_REARM_DELAY_SECS: u64 = 10;

const MIN_MEMORY_MIB: u32 = 128;

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    /// Architecture of the machine running qsession.
    pub fn host() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    /// Name used in hypervisor binary names (`qemu-system-<name>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Architecture::X86_64),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            other => Err(SessionError::ConfigError(format!(
                "unsupported architecture: '{}' (supported: x86_64, aarch64)",
                other
            ))),
        }
    }
}

/// Hardware acceleration preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceleration {
    /// Pick the best accelerator the host offers for the guest arch.
    #[default]
    Auto,
    Kvm,
    Hvf,
    /// Software emulation.
    Tcg,
}

impl fmt::Display for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acceleration::Auto => write!(f, "auto"),
            Acceleration::Kvm => write!(f, "kvm"),
            Acceleration::Hvf => write!(f, "hvf"),
            Acceleration::Tcg => write!(f, "tcg"),
        }
    }
}

impl FromStr for Acceleration {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Acceleration::Auto),
            "kvm" => Ok(Acceleration::Kvm),
            "hvf" => Ok(Acceleration::Hvf),
            "tcg" | "none" => Ok(Acceleration::Tcg),
            other => Err(SessionError::ConfigError(format!(
                "unknown acceleration: '{}' (supported: auto, kvm, hvf, tcg)",
                other
            ))),
        }
    }
}

/// Guest health watchdog settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub enabled: bool,
    /// Timeout for a `START` without an explicit second count.
    pub default_timeout_secs: u64,
    /// Fixed delay before re-triggering after a reset.
    pub rearm_delay_secs: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_timeout_secs: DEFAULT_WATCHDOG_TIMEOUT_SECS,
            rearm_delay_secs: DEFAULT_REARM_DELAY_SECS,
        }
    }
}

/// Explicit locations for external binaries. `None` means search for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub hypervisor: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub virtiofsd: Option<PathBuf>,
    pub swtpm: Option<PathBuf>,
    pub watchdog: Option<PathBuf>,
}

/// Configuration for one VM session.
///
/// Built once (defaults, then an optional YAML file, then CLI flags) and
/// never mutated while the session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Disk image to boot.
    pub image: PathBuf,

    /// Guest architecture. `None` uses the host architecture.
    pub arch: Option<Architecture>,

    /// Guest memory in MiB.
    pub memory_mib: u32,

    /// Number of virtual CPUs.
    pub cpus: u32,

    pub accel: Acceleration,

    pub watchdog: WatchdogSettings,

    /// Attach a software TPM.
    pub tpm: bool,

    /// Host directory exported to the guest over virtio-fs.
    pub share_dir: Option<PathBuf>,

    /// Host directory published to the guest over HTTP.
    pub publish_dir: Option<PathBuf>,

    /// Discard disk writes when the session ends.
    pub snapshot: bool,

    pub no_graphics: bool,

    /// Preferred host port forwarded to guest port 22.
    pub ssh_port: u16,

    /// Extra forwards, `host:guest[,host:guest...]`.
    pub forwards: String,

    /// Firmware image override.
    pub firmware: Option<PathBuf>,

    /// Arguments appended verbatim to the hypervisor command line.
    pub extra_args: Vec<String>,

    pub verbose: bool,

    pub tools: ToolPaths,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: PathBuf::new(),
            arch: None,
            memory_mib: DEFAULT_MEMORY_MIB,
            cpus: DEFAULT_CPUS,
            accel: Acceleration::Auto,
            watchdog: WatchdogSettings::default(),
            tpm: false,
            share_dir: None,
            publish_dir: None,
            snapshot: false,
            no_graphics: false,
            ssh_port: DEFAULT_SSH_PORT,
            forwards: String::new(),
            firmware: None,
            extra_args: Vec::new(),
            verbose: false,
            tools: ToolPaths::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a YAML session file. Missing keys keep their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a YAML session file from disk.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SessionError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Guest architecture, falling back to the host's.
    pub fn resolved_arch(&self) -> Result<Architecture> {
        match self.arch {
            Some(arch) => Ok(arch),
            None => Architecture::host(),
        }
    }

    /// Check values that do not need the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.image.as_os_str().is_empty() {
            return Err(SessionError::ConfigError("no disk image given".to_string()));
        }
        if self.memory_mib < MIN_MEMORY_MIB {
            return Err(SessionError::ConfigError(format!(
                "memory {} MiB is below the minimum of {} MiB",
                self.memory_mib, MIN_MEMORY_MIB
            )));
        }
        if self.cpus == 0 {
            return Err(SessionError::ConfigError(
                "cpu count must be at least 1".to_string(),
            ));
        }
        if self.ssh_port == 0 {
            return Err(SessionError::ConfigError("ssh port must not be 0".to_string()));
        }
        if self.watchdog.enabled && self.watchdog.rearm_delay_secs == 0 {
            return Err(SessionError::ConfigError(
                "watchdog re-arm delay must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a memory string ("512m", "4g", "2048") into MiB.
pub fn parse_memory(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty memory value".to_string());
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("gb") {
        (n, 1024u32)
    } else if let Some(n) = s.strip_suffix('g') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("mb") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 1)
    } else {
        // Assume megabytes if no suffix
        (s.as_str(), 1)
    };

    let num: u32 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid memory value: {s}"))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("memory value too large: {s}"))
}
