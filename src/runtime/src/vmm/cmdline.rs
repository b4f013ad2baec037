//! QEMU command line construction.

use std::path::Path;

use super::network::{forwardings, MacAddress, NETDEV_ID};
use super::spec::QemuConfig;
use crate::output::{INITRD_SUFFIX, KERNEL_SUFFIX};

/// Pid file written by QEMU under the state directory.
pub const PID_FILE: &str = "qemu.pid";

/// Host facts that change the generated command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo<'a> {
    pub arch: &'a str,
    pub linux: bool,
}

impl HostInfo<'static> {
    /// The host this process runs on.
    pub fn current() -> Self {
        Self {
            arch: std::env::consts::ARCH,
            linux: cfg!(target_os = "linux"),
        }
    }
}

/// Build the QEMU argument list.
///
/// `cmdline` is the kernel command line, omitted from `-append` when
/// `None`. `mac` is the guest MAC address, required unless networking is
/// disabled.
pub fn build_qemu_args(
    config: &QemuConfig,
    host: HostInfo<'_>,
    cmdline: Option<&str>,
    mac: Option<&MacAddress>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |parts: &[&str]| args.extend(parts.iter().map(|s| s.to_string()));

    push(&["-smp", &config.cpus.to_string()]);
    push(&["-m", &config.memory_mb.to_string()]);
    push(&["-uuid", &config.uuid.to_string()]);
    push(&["-pidfile", &display(&config.state_path.join(PID_FILE))]);

    let aarch64 = config.arch == "aarch64";
    if aarch64 {
        let cpu = if host.arch == "aarch64" {
            "host"
        } else {
            "cortex-a57"
        };
        push(&["-cpu", cpu]);
    }

    let machine = match (config.kvm, aarch64) {
        (true, true) => "virt,gic_version=host",
        (true, false) => "q35,accel=kvm:tcg",
        (false, true) => "virt",
        (false, false) => "q35",
    };
    if config.kvm {
        push(&["-enable-kvm"]);
    }
    push(&["-machine", machine]);

    let mut rng = String::from("rng-random,id=rng0");
    if host.linux {
        rng.push_str(",filename=/dev/urandom");
    }
    push(&["-object", &rng, "-device", "virtio-rng-pci,rng=rng0"]);

    if config.kernel {
        push(&["-kernel", &display(&config.artifact(KERNEL_SUFFIX))]);
        push(&["-initrd", &display(&config.artifact(INITRD_SUFFIX))]);
        if let Some(cmdline) = cmdline {
            push(&["-append", cmdline]);
        }
    }

    match (config.networking.netdev(), mac) {
        (Some(netdev), Some(mac)) => {
            let device = format!("virtio-net-pci,netdev={},mac={}", NETDEV_ID, mac);
            let netdev = format!("{}{}", netdev, forwardings(&config.published_ports));
            push(&["-device", &device, "-netdev", &netdev]);
        }
        _ => push(&["-net", "none"]),
    }

    if !config.gui {
        push(&["-nographic"]);
    }

    args
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
