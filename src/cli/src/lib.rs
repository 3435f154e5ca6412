//! qsession CLI - run a disk image as a one-shot QEMU session.

pub mod commands;
