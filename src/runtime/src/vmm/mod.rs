//! VMM module - QEMU launch of built boot images.
//!
//! - `QemuConfig`: Complete launch configuration
//! - `QemuLauncher`: Resolves QEMU and runs the guest
//! - `Networking`, `PublishedPort`: Guest networking

mod cmdline;
mod controller;
mod network;
mod spec;

pub use cmdline::{build_qemu_args, HostInfo, PID_FILE};
pub use controller::{find_qemu, QemuLauncher};
pub use network::{
    forwardings, retrieve_mac, MacAddress, Networking, Protocol, PublishedPort, MAC_ADDR_FILE,
};
pub use spec::{default_arch, default_state_path, have_kvm, parse_bool, QemuConfig, KVM_ENV};
