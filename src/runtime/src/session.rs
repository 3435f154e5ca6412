//! Session orchestrator: one hypervisor run from build to teardown.
//!
//! ```text
//! Building ──► Running ──► TearingDown ──► Done
//!    │                        ▲
//!    └──── build error ───────┘
//! ```
//!
//! Teardown runs on every path out of `run`, including build failures,
//! launch failures and interrupts.

use std::future::Future;
use std::path::{Path, PathBuf};

use qsession_core::config::{Acceleration, Architecture, SessionConfig};
use qsession_core::error::{Result, SessionError};
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::binaries::{find_companion, resolve_tool};
use crate::firmware::resolve_firmware;
use crate::host_check::resolve_acceleration;
use crate::network::NetworkPlan;
use crate::port::PortAllocator;
use crate::services::{
    persistent_state_dir, AuxiliaryService, FileServer, SoftwareTpm, VirtiofsDaemon,
    WatchdogProcess, WATCHDOG_BINARY,
};
use crate::vmm::{DiskImage, ResourcePlan, VmController, VmHandler};
use crate::workdir::{state_home, EphemeralWorkDir};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Resolving binaries, firmware, network; nothing started yet.
    Building,
    /// Auxiliary services and hypervisor started.
    Running,
    TearingDown,
    Done,
}

/// Binaries resolved during build.
#[derive(Debug)]
struct Toolchain {
    controller: VmController,
    /// `None` when the file server was requested but the helper is missing.
    python: Option<PathBuf>,
    watchdog: Option<PathBuf>,
    swtpm: Option<PathBuf>,
    virtiofsd: Option<PathBuf>,
}

/// Output of the build phase.
#[derive(Debug)]
struct Prepared {
    tools: Toolchain,
    disk: DiskImage,
    accel: Acceleration,
    firmware: Option<PathBuf>,
    network: NetworkPlan,
    tpm_state: Option<PathBuf>,
}

/// SIGINT / SIGTERM, registered before anything is started.
pub struct InterruptSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl InterruptSignal {
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves on the first signal.
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => tracing::debug!("SIGINT received"),
            _ = self.terminate.recv() => tracing::debug!("SIGTERM received"),
        }
    }
}

/// One VM session.
pub struct Session {
    config: SessionConfig,
    phase: SessionPhase,
    workdir: Option<EphemeralWorkDir>,
    workdir_path: Option<PathBuf>,
    services: Vec<AuxiliaryService>,
    vm: Option<VmHandler>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: SessionPhase::Building,
            workdir: None,
            workdir_path: None,
            services: Vec::new(),
            vm: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Work dir of this session, once created. Kept after removal.
    pub fn workdir_path(&self) -> Option<&Path> {
        self.workdir_path.as_deref()
    }

    /// Run to completion, aborting on SIGINT or SIGTERM.
    ///
    /// Returns the hypervisor's exit code.
    pub async fn run(&mut self) -> Result<i32> {
        let mut signals = InterruptSignal::install()?;
        self.run_until(async move { signals.recv().await }).await
    }

    /// Run to completion, aborting when `interrupt` resolves while services
    /// are starting or the hypervisor is running.
    pub async fn run_until<F>(&mut self, interrupt: F) -> Result<i32>
    where
        F: Future<Output = ()>,
    {
        if self.phase != SessionPhase::Building {
            return Err(SessionError::Other("session already ran".to_string()));
        }

        let result = self.build_and_run(interrupt).await;
        self.teardown().await;
        result
    }

    async fn build_and_run<F>(&mut self, interrupt: F) -> Result<i32>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(image = %self.config.image.display(), "Starting session");

        let prepared = self.build()?;
        let workdir = EphemeralWorkDir::create()?;
        self.workdir_path = Some(workdir.path().to_path_buf());
        self.workdir = Some(workdir);

        self.phase = SessionPhase::Running;
        tokio::pin!(interrupt);

        // A service still starting when the interrupt lands is dropped,
        // which kills its child.
        let plan = tokio::select! {
            plan = self.start_services(&prepared) => plan?,
            () = &mut interrupt => {
                tracing::warn!("Interrupted while starting services");
                return Err(SessionError::Aborted);
            }
        };

        // Start the hypervisor and block on it
        let vm = self.vm.insert(prepared.tools.controller.start(&plan)?);
        if let Some(port) = prepared.network.ssh_host_port() {
            tracing::info!(port, "Guest SSH forwarded from 127.0.0.1:{}", port);
        }

        let exited = tokio::select! {
            code = vm.wait() => Some(code),
            () = &mut interrupt => None,
        };

        match exited {
            Some(code) => {
                let code = code?;
                tracing::info!(exit_code = code, "Hypervisor exited");
                Ok(code)
            }
            None => {
                tracing::warn!("Interrupted, stopping hypervisor");
                vm.stop().await;
                Err(SessionError::Aborted)
            }
        }
    }

    /// Resolve everything needed to launch. Starts no process.
    fn build(&self) -> Result<Prepared> {
        let config = &self.config;

        // 1. Static checks
        config.validate()?;
        let arch = config.resolved_arch()?;
        let disk = DiskImage::open(&config.image)?;
        for (flag, dir) in [("share", &config.share_dir), ("publish", &config.publish_dir)] {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    return Err(SessionError::ConfigError(format!(
                        "--{} directory not found: {}",
                        flag,
                        dir.display()
                    )));
                }
            }
        }

        // 2. Binaries; only the file-server helper may be absent
        let tools = self.resolve_tools(arch)?;

        // 3. Platform parameters
        let accel = resolve_acceleration(config.accel, arch)?;
        let firmware = resolve_firmware(arch, config.firmware.as_deref())?;

        // 4. Network
        let mut allocator = PortAllocator::new();
        let network = NetworkPlan::build(&mut allocator, config.ssh_port, &config.forwards)?;

        // 5. Persistent TPM state unless the session is a snapshot
        let tpm_state = if config.tpm && !config.snapshot {
            Some(persistent_state_dir(&state_home()?, &config.image))
        } else {
            None
        };

        tracing::debug!(
            arch = %arch,
            accel = %accel,
            format = %disk.format,
            mac = %network.mac,
            "Session plan built"
        );

        Ok(Prepared {
            tools,
            disk,
            accel,
            firmware,
            network,
            tpm_state,
        })
    }

    fn resolve_tools(&self, arch: Architecture) -> Result<Toolchain> {
        let config = &self.config;
        let paths = &config.tools;

        let controller = VmController::locate(arch, paths.hypervisor.as_deref())?;

        let python = match &config.publish_dir {
            Some(_) => match resolve_tool(
                "python3",
                paths.python.as_deref(),
                "Install python3 to publish a directory",
            ) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "File server unavailable, continuing without it");
                    None
                }
            },
            None => None,
        };

        let watchdog = if config.watchdog.enabled {
            let found = match paths.watchdog.as_deref() {
                Some(path) => Some(resolve_tool(
                    WATCHDOG_BINARY,
                    Some(path),
                    "Check tools.watchdog",
                )?),
                None => find_companion(WATCHDOG_BINARY),
            };
            Some(found.ok_or_else(|| SessionError::MissingDependency {
                binary: WATCHDOG_BINARY.to_string(),
                hint: Some("Build it with: cargo build -p qsession-watchdog".to_string()),
            })?)
        } else {
            None
        };

        let swtpm = if config.tpm {
            Some(resolve_tool(
                "swtpm",
                paths.swtpm.as_deref(),
                "Install swtpm to attach a software TPM",
            )?)
        } else {
            None
        };

        let virtiofsd = if config.share_dir.is_some() {
            Some(resolve_tool(
                "virtiofsd",
                paths.virtiofsd.as_deref(),
                "Install virtiofsd to share a host directory",
            )?)
        } else {
            None
        };

        Ok(Toolchain {
            controller,
            python,
            watchdog,
            swtpm,
            virtiofsd,
        })
    }

    /// Start auxiliary services in order: file server, watchdog, TPM,
    /// shared folder. Returns the launch plan wired to their sockets.
    async fn start_services(&mut self, prepared: &Prepared) -> Result<ResourcePlan> {
        let workdir = self
            .workdir
            .as_ref()
            .ok_or_else(|| SessionError::Other("work dir missing".to_string()))?;
        let config = &self.config;
        let verbose = config.verbose;

        let qmp_socket = workdir.qmp_socket();
        let watchdog_channel = workdir.watchdog_socket();
        let tpm_socket = workdir.tpm_socket();
        let virtiofs_socket = workdir.virtiofs_socket();
        let tpm_state = prepared
            .tpm_state
            .clone()
            .unwrap_or_else(|| workdir.tpm_state_dir());

        let mut guestfwd = None;
        if let (Some(python), Some(dir)) = (&prepared.tools.python, &config.publish_dir) {
            match FileServer::start(python, dir, verbose).await {
                Ok(server) => {
                    guestfwd = Some(server.guestfwd());
                    self.services.push(AuxiliaryService::HttpFileServer(server));
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "File server failed to start, continuing without it"
                    );
                }
            }
        }

        if let Some(binary) = &prepared.tools.watchdog {
            let watchdog = WatchdogProcess::start(
                binary,
                &watchdog_channel,
                &qmp_socket,
                &config.watchdog,
                verbose,
            )?;
            self.services.push(AuxiliaryService::Watchdog(watchdog));
        }

        if let Some(binary) = &prepared.tools.swtpm {
            let tpm = SoftwareTpm::start(binary, &tpm_socket, &tpm_state, verbose).await?;
            self.services.push(AuxiliaryService::SoftwareTpm(tpm));
        }

        if let (Some(binary), Some(dir)) = (&prepared.tools.virtiofsd, &config.share_dir) {
            let daemon = VirtiofsDaemon::start(binary, &virtiofs_socket, dir, verbose).await?;
            self.services.push(AuxiliaryService::Virtiofsd(daemon));
        }

        Ok(ResourcePlan {
            arch: config.resolved_arch()?,
            accel: prepared.accel,
            memory_mib: config.memory_mib,
            cpus: config.cpus,
            firmware: prepared.firmware.clone(),
            disk: prepared.disk.clone(),
            snapshot: config.snapshot,
            no_graphics: config.no_graphics,
            mac: prepared.network.mac,
            forwards: prepared.network.forwards.clone(),
            guestfwd,
            qmp_socket,
            watchdog_channel: prepared.tools.watchdog.as_ref().map(|_| watchdog_channel),
            tpm_socket: prepared.tools.swtpm.as_ref().map(|_| tpm_socket),
            virtiofs_socket: prepared.tools.virtiofsd.as_ref().map(|_| virtiofs_socket),
            extra_args: config.extra_args.clone(),
        })
    }

    /// Stop everything this session started and remove the work dir.
    ///
    /// Never fails; calling it again is a no-op.
    pub async fn teardown(&mut self) {
        if self.phase == SessionPhase::Done {
            return;
        }
        self.phase = SessionPhase::TearingDown;

        if let Some(vm) = self.vm.as_mut() {
            vm.stop().await;
        }

        for service in self.services.iter_mut().rev() {
            service.terminate().await;
        }
        self.services.clear();

        if let Some(workdir) = self.workdir.as_mut() {
            workdir.remove();
        }

        self.phase = SessionPhase::Done;
        tracing::debug!("Session torn down");
    }
}
