//! QemuConfig - Complete configuration for a QEMU boot.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bootkit_core::error::{BootError, Result};
use uuid::Uuid;

use super::network::{Networking, PublishedPort};

/// Environment variable overriding KVM acceleration.
pub const KVM_ENV: &str = "BOOTKIT_QEMU_KVM";

/// Default number of vCPUs.
pub const DEFAULT_CPUS: u32 = 1;

/// Default guest memory in MiB.
pub const DEFAULT_MEMORY_MB: u32 = 1024;

/// Configuration for booting a kernel+initrd image under QEMU.
#[derive(Debug, Clone)]
pub struct QemuConfig {
    /// Image prefix; artifacts are `<path>-kernel`, `<path>-initrd.img`
    /// and `<path>-cmdline`
    pub path: PathBuf,

    /// Boot the kernel+initrd artifacts
    pub kernel: bool,

    /// Use a display window instead of the terminal
    pub gui: bool,

    /// Directory for the pid file and persisted MAC address
    pub state_path: PathBuf,

    /// Guest architecture, e.g. x86_64 or aarch64
    pub arch: String,

    /// Number of vCPUs
    pub cpus: u32,

    /// Memory in MiB
    pub memory_mb: u32,

    /// Enable KVM acceleration
    pub kvm: bool,

    /// QEMU binary; looked up on `PATH` when unset
    pub qemu_bin_path: Option<PathBuf>,

    /// Ports forwarded from the host, user networking only
    pub published_ports: Vec<PublishedPort>,

    /// Guest networking mode
    pub networking: Networking,

    /// Populates /sys/class/dmi/id/product_uuid in the guest
    pub uuid: Uuid,
}

impl QemuConfig {
    /// Defaults for the image at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            state_path: default_state_path(&path),
            path,
            kernel: true,
            gui: false,
            arch: default_arch().to_string(),
            cpus: DEFAULT_CPUS,
            memory_mb: DEFAULT_MEMORY_MB,
            kvm: have_kvm(),
            qemu_bin_path: None,
            published_ports: Vec::new(),
            networking: Networking::default(),
            uuid: Uuid::new_v4(),
        }
    }

    /// Check settings that QEMU would otherwise reject at startup.
    pub fn validate(&self) -> Result<()> {
        if self.arch.is_empty() {
            return Err(BootError::ConfigError(
                "guest architecture must not be empty".to_string(),
            ));
        }
        if self.cpus == 0 {
            return Err(BootError::ConfigError(
                "at least one vCPU is required".to_string(),
            ));
        }
        if self.memory_mb == 0 {
            return Err(BootError::ConfigError(
                "guest memory must be non-zero".to_string(),
            ));
        }
        self.networking.check_ports(&self.published_ports)
    }

    /// `<path><suffix>`.
    pub fn artifact(&self, suffix: &str) -> PathBuf {
        let mut path = OsString::from(self.path.as_os_str());
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Apply the KVM override from the environment, if set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(KVM_ENV) {
            if !value.is_empty() {
                self.kvm = parse_bool(&value).ok_or_else(|| {
                    BootError::ConfigError(format!(
                        "Unable to parse {}={:?} as a boolean",
                        KVM_ENV, value
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// `<path>-state`.
pub fn default_state_path(path: &Path) -> PathBuf {
    let mut state = OsString::from(path.as_os_str());
    state.push("-state");
    PathBuf::from(state)
}

/// Guest architecture matching the host.
pub fn default_arch() -> &'static str {
    std::env::consts::ARCH
}

/// Whether `/dev/kvm` is present.
pub fn have_kvm() -> bool {
    Path::new("/dev/kvm").exists()
}

/// Boolean spellings accepted by environment overrides.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
