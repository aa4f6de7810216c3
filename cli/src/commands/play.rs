//! `gom play` command: resolve a disk, boot it, supervise the emulator.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use clap::Args;
use gom_core::config::{
    generate_machine_name, parse_port_forwards, Arch, DiskLayout, MachineConfig, MemorySize,
    NetworkSpec, RegistryCredentials, SharedNetwork, SourceSpec,
};
use gom_core::error::MachineError;
use gom_runtime::Machine;

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Guest architecture (amd64, arm64)
    #[arg(long, default_value = "amd64")]
    pub arch: Arch,

    /// Raw disk image to boot as-is
    #[arg(long)]
    pub full: Option<PathBuf>,

    /// Bundle archive (zip with mbr.img, boot.img, root.img, sbom.json)
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// OCI artifact reference (registry/repository:tag)
    #[arg(long)]
    pub oci: Option<String>,

    /// Registry username (falls back to REGISTRY_USERNAME)
    #[arg(long)]
    pub oci_user: Option<String>,

    /// Registry password (falls back to REGISTRY_PASSWORD)
    #[arg(long)]
    pub oci_password: Option<String>,

    /// Talk plain HTTP to the registry
    #[arg(long)]
    pub oci_plain_http: bool,

    /// MBR partition image
    #[arg(long)]
    pub mbr: Option<PathBuf>,

    /// Boot partition image
    #[arg(long)]
    pub boot: Option<PathBuf>,

    /// Root partition image
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Guest memory (e.g. "512M", "1G", "1.5G")
    #[arg(long, default_value = "1G", value_parser = MemorySize::parse)]
    pub memory: MemorySize,

    /// Number of guest CPU cores
    #[arg(long, default_value_t = 1)]
    pub cores: u32,

    /// Custom NAT forwards: HOST[:GUEST],... (bare HOST ports map to 80, 443, 22)
    #[arg(long)]
    pub net_nat: Option<String>,

    /// Shared networking (macOS only): START,END,SUBNET-MASK
    #[arg(long)]
    pub net_shared: Option<String>,

    /// Emulator instance name
    #[arg(long)]
    pub name: Option<String>,
}

impl PlayArgs {
    /// Validate the flags into an immutable run configuration.
    pub fn into_config(self) -> Result<MachineConfig, MachineError> {
        let nat = self
            .net_nat
            .as_deref()
            .map(parse_port_forwards)
            .transpose()?;
        let shared = self
            .net_shared
            .as_deref()
            .map(str::parse::<SharedNetwork>)
            .transpose()?;

        let config = MachineConfig {
            name: self.name.unwrap_or_else(generate_machine_name),
            arch: self.arch,
            memory: self.memory,
            cores: self.cores,
            source: SourceSpec {
                full: self.full,
                mbr: self.mbr,
                boot: self.boot,
                root: self.root,
                archive: self.archive,
                artifact: self.oci,
                credentials: RegistryCredentials {
                    username: self.oci_user,
                    password: self.oci_password,
                },
                plain_http: self.oci_plain_http,
            },
            network: NetworkSpec { nat, shared },
            layout: DiskLayout::default(),
        };

        config.validate()?;
        Ok(config)
    }
}

pub async fn execute(args: PlayArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.into_config()?;
    tracing::debug!(name = %config.name, arch = %config.arch, "Machine configured");

    // Listeners go in before any work so an early Ctrl-C still cleans up
    let shutdown = shutdown_signal()?;
    let termination = Machine::new(config).run(shutdown).await?;

    if termination.was_cancelled() {
        tracing::info!("Emulator stopped, shut down cleanly");
    }
    Ok(termination.exit_code())
}

/// Register SIGINT and SIGTERM listeners now; the returned future resolves
/// on the first of them.
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        Ok(async move {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
        })
    }

    #[cfg(not(unix))]
    {
        let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
        Ok(async move {
            ctrl_c.recv().await;
        })
    }
}
