//! `qsession run` command: boot an image until the VM exits.

use std::path::PathBuf;

use clap::Args;
use qsession_core::config::{parse_memory, SessionConfig};
use qsession_core::error::{Result, SessionError};
use qsession_runtime::Session;

#[derive(Args)]
pub struct RunArgs {
    /// Disk image to boot (qcow2 or raw)
    pub image: PathBuf,

    /// YAML session file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Guest architecture (x86_64, aarch64); defaults to the host's
    #[arg(long)]
    pub arch: Option<String>,

    /// Memory (e.g., "512m", "4g")
    #[arg(long)]
    pub memory: Option<String>,

    /// Number of CPUs
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Accelerator: auto, kvm, hvf, tcg
    #[arg(long)]
    pub accel: Option<String>,

    /// Reset the guest when it stops reporting health
    #[arg(long)]
    pub watchdog: bool,

    /// Watchdog timeout in seconds for a START without a count
    #[arg(long)]
    pub watchdog_timeout: Option<u64>,

    /// Attach a software TPM (swtpm)
    #[arg(long)]
    pub tpm: bool,

    /// Share a host directory over virtio-fs (tag "hostshare")
    #[arg(long)]
    pub share: Option<PathBuf>,

    /// Publish a host directory over HTTP at 10.0.2.100:80 in the guest
    #[arg(long)]
    pub publish: Option<PathBuf>,

    /// Discard disk writes when the VM exits
    #[arg(long)]
    pub snapshot: bool,

    /// Run without a display window
    #[arg(long)]
    pub no_graphics: bool,

    /// Preferred host port for guest SSH
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// Port forwards, host:guest[,host:guest...]
    #[arg(long)]
    pub forward: Option<String>,

    /// Firmware image override
    #[arg(long)]
    pub firmware: Option<PathBuf>,

    /// Extra arguments passed to the hypervisor
    #[arg(last = true)]
    pub extra: Vec<String>,
}

pub async fn execute(
    args: RunArgs,
    verbose: bool,
) -> std::result::Result<i32, Box<dyn std::error::Error>> {
    let config = build_config(args, verbose)?;
    tracing::debug!(
        memory_mib = config.memory_mib,
        cpus = config.cpus,
        accel = %config.accel,
        "Session config resolved"
    );
    let mut session = Session::new(config);
    let code = session.run().await?;
    Ok(code)
}

/// Resolve the session config: defaults, then `--config`, then flags.
pub fn build_config(args: RunArgs, verbose: bool) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_yaml_file(path)?,
        None => SessionConfig::default(),
    };

    config.image = args.image;
    if let Some(arch) = &args.arch {
        config.arch = Some(arch.parse()?);
    }
    if let Some(memory) = &args.memory {
        config.memory_mib = parse_memory(memory)
            .map_err(|e| SessionError::ConfigError(format!("Invalid --memory: {e}")))?;
    }
    if let Some(cpus) = args.cpus {
        config.cpus = cpus;
    }
    if let Some(accel) = &args.accel {
        config.accel = accel.parse()?;
    }
    if args.watchdog {
        config.watchdog.enabled = true;
    }
    if let Some(timeout) = args.watchdog_timeout {
        config.watchdog.default_timeout_secs = timeout;
    }
    config.tpm |= args.tpm;
    if args.share.is_some() {
        config.share_dir = args.share;
    }
    if args.publish.is_some() {
        config.publish_dir = args.publish;
    }
    config.snapshot |= args.snapshot;
    config.no_graphics |= args.no_graphics;
    if let Some(port) = args.ssh_port {
        config.ssh_port = port;
    }
    if let Some(forward) = args.forward {
        config.forwards = forward;
    }
    if args.firmware.is_some() {
        config.firmware = args.firmware;
    }
    if !args.extra.is_empty() {
        config.extra_args = args.extra;
    }
    config.verbose |= verbose;

    config.validate()?;
    Ok(config)
}
