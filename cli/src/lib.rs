//! gom CLI - boot gokrazy-style disk images under QEMU.

pub mod commands;
