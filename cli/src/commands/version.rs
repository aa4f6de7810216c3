//! `gom version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<i32, Box<dyn std::error::Error>> {
    println!("gom version {}", gom_core::VERSION);
    Ok(0)
}
