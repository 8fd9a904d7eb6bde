//! Stoker CLI - secret store bootstrapper
//!
//! This is the main entry point for the stoker command-line interface.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands, ProvisionCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Bootstrap(args) => commands::bootstrap::run(args, cli.config.as_deref()).await,
        Commands::Provision(ProvisionCommands::Run(args)) => {
            commands::provision::run(args, cli.config.as_deref()).await
        }
        Commands::Provision(ProvisionCommands::Regen(args)) => {
            commands::provision::regen(args, cli.config.as_deref()).await
        }
        Commands::Broker(args) => commands::broker::run(args, cli.config.as_deref()).await,
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
