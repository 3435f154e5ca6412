//! Renders a [`ResourcePlan`] into a QEMU command line.

use std::path::Path;

use qsession_core::config::{Acceleration, Architecture};

use super::plan::ResourcePlan;
use crate::services::{CHANNEL_NAME, MOUNT_TAG};

/// `qemu-system-<arch>`.
pub fn hypervisor_binary(arch: Architecture) -> String {
    format!("qemu-system-{}", arch.as_str())
}

pub fn render_args(plan: &ResourcePlan) -> Vec<String> {
    let mut args = Args::default();

    let machine = match plan.arch {
        Architecture::X86_64 => "q35",
        Architecture::Aarch64 => "virt",
    };
    args.pair("-machine", machine);
    args.pair("-accel", plan.accel.to_string());
    let cpu = match plan.accel {
        Acceleration::Tcg | Acceleration::Auto => "max",
        Acceleration::Kvm | Acceleration::Hvf => "host",
    };
    args.pair("-cpu", cpu);
    args.pair("-m", format!("{}M", plan.memory_mib));
    args.pair("-smp", plan.cpus.to_string());

    if let Some(firmware) = &plan.firmware {
        args.pair("-bios", firmware.display().to_string());
    }

    args.pair(
        "-drive",
        format!(
            "file={},format={},if=virtio",
            escape(&plan.disk.path),
            plan.disk.format
        ),
    );
    if plan.snapshot {
        args.flag("-snapshot");
    }

    let mut netdev = String::from("user,id=net0");
    for rule in &plan.forwards {
        netdev.push_str(&format!(
            ",hostfwd=tcp:127.0.0.1:{}-:{}",
            rule.host_port, rule.guest_port
        ));
    }
    if let Some(guestfwd) = &plan.guestfwd {
        netdev.push_str(&format!(",guestfwd={}", guestfwd));
    }
    args.pair("-netdev", netdev);
    args.pair("-device", format!("virtio-net-pci,netdev=net0,mac={}", plan.mac));

    args.pair(
        "-qmp",
        format!("unix:{},server=on,wait=off", escape(&plan.qmp_socket)),
    );

    if let Some(channel) = &plan.watchdog_channel {
        args.pair("-device", "virtio-serial-pci");
        args.pair(
            "-chardev",
            format!("socket,id=watchdog,path={},server=on,wait=off", escape(channel)),
        );
        args.pair(
            "-device",
            format!("virtserialport,chardev=watchdog,name={}", CHANNEL_NAME),
        );
    }

    if let Some(tpm) = &plan.tpm_socket {
        args.pair("-chardev", format!("socket,id=chrtpm,path={}", escape(tpm)));
        args.pair("-tpmdev", "emulator,id=tpm0,chardev=chrtpm");
        let device = match plan.arch {
            Architecture::X86_64 => "tpm-tis",
            Architecture::Aarch64 => "tpm-tis-device",
        };
        args.pair("-device", format!("{},tpmdev=tpm0", device));
    }

    if let Some(socket) = &plan.virtiofs_socket {
        // vhost-user needs guest RAM in a shareable mapping.
        args.pair(
            "-object",
            format!("memory-backend-memfd,id=mem,size={}M,share=on", plan.memory_mib),
        );
        args.pair("-numa", "node,memdev=mem");
        args.pair("-chardev", format!("socket,id=char-fs,path={}", escape(socket)));
        args.pair(
            "-device",
            format!("vhost-user-fs-pci,chardev=char-fs,tag={}", MOUNT_TAG),
        );
    }

    if plan.no_graphics {
        args.flag("-nographic");
    }

    let mut args = args.0;
    args.extend(plan.extra_args.iter().cloned());
    args
}

/// QEMU option values use `,` as separator; a literal comma is doubled.
fn escape(path: &Path) -> String {
    path.display().to_string().replace(',', ",,")
}

#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn flag(&mut self, flag: &str) {
        self.0.push(flag.to_string());
    }

    fn pair(&mut self, flag: &str, value: impl Into<String>) {
        self.0.push(flag.to_string());
        self.0.push(value.into());
    }
}
