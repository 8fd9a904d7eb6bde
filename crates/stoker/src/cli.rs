//! CLI argument parsing with clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Stoker - secret store bootstrapper and credential provisioner
#[derive(Parser, Debug)]
#[command(name = "stoker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to stoker.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize and unseal the secret store, then perform token
    /// maintenance
    Bootstrap(BootstrapArgs),

    /// Provision per-service credentials
    #[command(subcommand)]
    Provision(ProvisionCommands),

    /// Run the mutual-TLS workload-identity token broker
    Broker(BrokerArgs),
}

#[derive(Args, Debug)]
pub struct BootstrapArgs {}

#[derive(Subcommand, Debug)]
pub enum ProvisionCommands {
    /// Provision every configured service
    Run(ProvisionRunArgs),

    /// Regenerate credentials for one service
    Regen(ProvisionRegenArgs),
}

#[derive(Args, Debug)]
pub struct ProvisionRunArgs {}

#[derive(Args, Debug)]
pub struct ProvisionRegenArgs {
    /// Service whose credentials are regenerated
    pub service: String,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {}
