//! VmController - Spawns the hypervisor process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use qsession_core::config::Architecture;
use qsession_core::error::{Result, SessionError};
use tokio::process::Command;

use super::handler::VmHandler;
use super::qemu::{hypervisor_binary, render_args};
use super::plan::ResourcePlan;
use crate::binaries::resolve_tool;
use crate::services::ManagedProcess;

/// Controller for spawning the primary hypervisor process.
#[derive(Debug, Clone)]
pub struct VmController {
    hypervisor: PathBuf,
}

impl VmController {
    /// Use an explicit hypervisor binary, or find `qemu-system-<arch>`.
    pub fn locate(arch: Architecture, override_path: Option<&Path>) -> Result<Self> {
        let name = hypervisor_binary(arch);
        let hypervisor = resolve_tool(
            &name,
            override_path,
            &format!("Install QEMU so that {} is on PATH", name),
        )?;
        Ok(Self { hypervisor })
    }

    pub fn hypervisor(&self) -> &Path {
        &self.hypervisor
    }

    /// Start the hypervisor for `plan`. Console I/O stays on the terminal.
    pub fn start(&self, plan: &ResourcePlan) -> Result<VmHandler> {
        let args = render_args(plan);
        tracing::debug!(
            hypervisor = %self.hypervisor.display(),
            args = %args.join(" "),
            "Hypervisor command line"
        );

        let mut command = Command::new(&self.hypervisor);
        command
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let process = ManagedProcess::spawn("qemu", &mut command).map_err(|e| {
            SessionError::LaunchError {
                message: e.to_string(),
                hint: Some(format!("Hypervisor path: {}", self.hypervisor.display())),
            }
        })?;

        tracing::info!(
            pid = process.pid(),
            arch = %plan.arch,
            accel = %plan.accel,
            memory_mib = plan.memory_mib,
            cpus = plan.cpus,
            "Hypervisor started"
        );

        Ok(VmHandler::new(process))
    }
}
