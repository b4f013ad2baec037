//! `bootkit version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("bootkit version {}", bootkit_core::VERSION);
    Ok(())
}
