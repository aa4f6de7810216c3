//! CLI command definitions and dispatch.

mod play;
mod version;

use clap::{Parser, Subcommand};

pub use play::PlayArgs;

/// gom - run gokrazy-style machines under QEMU.
#[derive(Parser)]
#[command(name = "gom", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Boot a machine from a disk image, partition files, an archive or an OCI artifact
    Play(play::PlayArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Returns the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Play(args) => play::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
