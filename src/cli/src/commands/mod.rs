//! CLI command definitions and dispatch.

mod build;
mod run;
mod version;

use clap::{Parser, Subcommand};

/// Bootkit - boot images assembled from container images.
#[derive(Parser)]
#[command(name = "bootkit", version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build kernel+initrd artifacts from a YAML config
    Build(build::BuildArgs),
    /// Boot built artifacts in a VM
    Run(run::RunArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args),
        Command::Run(args) => run::execute(args),
        Command::Version(args) => version::execute(args),
    }
}
