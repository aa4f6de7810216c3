//! gom CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gom_cli::commands::{dispatch, Cli};
use gom_core::MachineError;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.downcast_ref::<MachineError>().and_then(MachineError::hint) {
                eprintln!("Hint: {hint}");
            }
            1
        }
    };

    std::process::exit(code);
}
