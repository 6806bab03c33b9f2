//! kubenode CLI.
//!
//! Declares a single-node Kubernetes stack on AWS, previews and applies it,
//! and bootstraps the control plane on the instance itself.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await
#![allow(clippy::unused_async)]

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod commands;
mod ui;

use commands::bootstrap::BootstrapCommand;
use commands::destroy::DestroyCommand;
use commands::outputs::OutputsCommand;
use commands::preview::PreviewCommand;
use commands::status::StatusCommand;
use commands::up::UpCommand;
use commands::user_data::UserDataCommand;

/// kubenode - single-node Kubernetes on AWS.
#[derive(Parser)]
#[command(
    name = "kubenode",
    version,
    about = "Single-node Kubernetes control plane on AWS",
    long_about = "Provision a VPC, subnet, security group and EC2 instance, and\n\
                  bootstrap a kubeadm control plane on it.\n\n\
                  Both halves are idempotent: re-running `up` only changes what\n\
                  differs from the recorded state, and re-running `bootstrap`\n\
                  skips every step whose checks already pass."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what `up` would change.
    Preview(PreviewCommand),

    /// Create or update the stack and print its outputs.
    Up(UpCommand),

    /// Tear down every recorded resource.
    Destroy(DestroyCommand),

    /// Print the recorded outputs.
    Outputs(OutputsCommand),

    /// Print the instance's user-data script.
    UserData(UserDataCommand),

    /// Bootstrap the control plane on this node.
    ///
    /// Runs each step's checks and applies only the steps that are not
    /// already satisfied. Usually run as root on the instance.
    Bootstrap(BootstrapCommand),

    /// Show the recorded bootstrap state of this node.
    Status(StatusCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Bootstrap(cmd) => cmd.log_file(),
        _ => None,
    };
    init_tracing(cli.verbose, log_file)?;

    match cli.command {
        Commands::Preview(cmd) => cmd.run().await,
        Commands::Up(cmd) => cmd.run().await,
        Commands::Destroy(cmd) => cmd.run().await,
        Commands::Outputs(cmd) => cmd.run(),
        Commands::UserData(cmd) => cmd.run(),
        Commands::Bootstrap(cmd) => cmd.run().await,
        Commands::Status(cmd) => cmd.run(),
    }
}

/// Console logging, honouring `RUST_LOG`, plus JSON lines appended to
/// `log_file` when given.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose {
        "info,kubenode=debug,kubenode_stack=debug,kubenode_cloud=debug,kubenode_bootstrap=debug"
    } else {
        "warn,kubenode=info,kubenode_cloud=info,kubenode_bootstrap=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(())
}
