//! `bootkit run` command - boot built artifacts in a VM.

use std::path::PathBuf;

use bootkit_runtime::vmm::{have_kvm, Networking, PublishedPort, QemuConfig, QemuLauncher};
use clap::{ArgAction, Args, Subcommand};

use crate::output::parse_memory;

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct RunArgs {
    #[command(subcommand)]
    pub backend: Option<Backend>,

    #[command(flatten)]
    pub qemu: QemuArgs,
}

/// Run backends.
#[derive(Subcommand)]
pub enum Backend {
    /// Boot with QEMU [linux]
    Qemu(QemuArgs),
}

#[derive(Args)]
#[command(
    after_help = "'--networking bridge,br0' requires a setuid network helper and appropriate \
                  host configuration when not running as root, see \
                  http://wiki.qemu.org/Features/HelperNetworking."
)]
pub struct QemuArgs {
    /// Image prefix; boots <path>-kernel, <path>-initrd.img and <path>-cmdline
    #[arg(default_value = "image")]
    pub path: PathBuf,

    /// Use video output instead of stdio
    #[arg(long)]
    pub gui: bool,

    /// Boot image is kernel+initrd+cmdline
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub kernel: bool,

    /// Directory to keep VM state in [default: <path>-state]
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Enable KVM acceleration [default: true when /dev/kvm exists]
    #[arg(long, action = ArgAction::Set)]
    pub kvm: Option<bool>,

    /// Guest architecture, e.g. x86_64, aarch64
    #[arg(long, default_value = std::env::consts::ARCH)]
    pub arch: String,

    /// Number of CPUs
    #[arg(long, default_value_t = 1)]
    pub cpus: u32,

    /// Amount of memory (e.g., "1024", "512m", "2g")
    #[arg(long = "mem", default_value = "1024", value_parser = parse_memory)]
    pub memory_mb: u32,

    /// Networking mode: user, default, tap,<name>, bridge,<name> or none
    #[arg(long, default_value = "user")]
    pub networking: String,

    /// Publish a VM port to the host (host:guest[/tcp|/udp]), can be repeated
    #[arg(long)]
    pub publish: Vec<String>,
}

pub fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let qemu = match args.backend {
        Some(Backend::Qemu(qemu)) => qemu,
        None if cfg!(target_os = "linux") => args.qemu,
        None => {
            return Err("There currently is no default 'run' backend for your platform".into())
        }
    };

    let mut config = qemu_config(qemu)?;
    config.apply_env_overrides()?;
    let launcher = QemuLauncher::new(config)?;
    launcher.run()?;
    Ok(())
}

/// Translate command line options into a launch configuration.
fn qemu_config(args: QemuArgs) -> Result<QemuConfig, Box<dyn std::error::Error>> {
    let networking: Networking = args.networking.parse()?;
    let published_ports = args
        .publish
        .iter()
        .map(|p| p.parse::<PublishedPort>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = QemuConfig::new(args.path);
    if let Some(state) = args.state {
        config.state_path = state;
    }
    config.kernel = args.kernel;
    config.gui = args.gui;
    config.arch = args.arch;
    config.cpus = args.cpus;
    config.memory_mb = args.memory_mb;
    config.kvm = args.kvm.unwrap_or_else(have_kvm);
    config.networking = networking;
    config.published_ports = published_ports;
    config.validate()?;
    Ok(config)
}
