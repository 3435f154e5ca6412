//! VMM module - the primary hypervisor process.
//!
//! - `ResourcePlan`: everything the hypervisor is launched with
//! - `render_args`: plan to QEMU command line
//! - `VmController`: spawns the hypervisor
//! - `VmHandler`: wait / stop on the running hypervisor

mod controller;
mod handler;
mod plan;
mod qemu;

pub use controller::VmController;
pub use handler::{exit_code, VmHandler};
pub use plan::{DiskFormat, DiskImage, ResourcePlan};
pub use qemu::{hypervisor_binary, render_args};
