//! QemuLauncher - Boots kernel+initrd artifacts under QEMU.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use bootkit_core::error::{BootError, Result};

use super::cmdline::{build_qemu_args, HostInfo};
use super::network::retrieve_mac;
use super::spec::QemuConfig;
use crate::output::{CMDLINE_SUFFIX, KERNEL_SUFFIX};

/// Launcher for a validated QEMU configuration.
pub struct QemuLauncher {
    config: QemuConfig,
    /// Resolved QEMU binary
    qemu_bin: PathBuf,
}

impl QemuLauncher {
    /// Validate `config` and resolve the QEMU binary.
    ///
    /// Fails when the image has no kernel artifact or when no
    /// `qemu-system-<arch>` binary can be found.
    pub fn new(config: QemuConfig) -> Result<Self> {
        config.validate()?;

        if !config.path.exists() {
            let kernel = config.artifact(KERNEL_SUFFIX);
            if !kernel.exists() {
                return Err(BootError::LaunchError {
                    message: format!("Could not find kernel image {}", kernel.display()),
                    hint: Some("Build the image first with: bootkit build <config>".to_string()),
                });
            }
        }

        let qemu_bin = match &config.qemu_bin_path {
            Some(path) => path.clone(),
            None => find_qemu(&config.arch)?,
        };

        Ok(Self { config, qemu_bin })
    }

    pub fn config(&self) -> &QemuConfig {
        &self.config
    }

    pub fn qemu_bin(&self) -> &Path {
        &self.qemu_bin
    }

    /// Create the state directory and compute the QEMU arguments.
    pub fn prepare(&self) -> Result<Vec<String>> {
        let state = &self.config.state_path;
        std::fs::create_dir_all(state).map_err(|e| BootError::LaunchError {
            message: format!(
                "Could not create state directory {}: {}",
                state.display(),
                e
            ),
            hint: None,
        })?;

        let cmdline = if self.config.kernel {
            let path = self.config.artifact(CMDLINE_SUFFIX);
            match std::fs::read_to_string(&path) {
                Ok(cmdline) => Some(cmdline),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot open cmdline file");
                    None
                }
            }
        } else {
            None
        };

        let mac = match self.config.networking.netdev() {
            Some(_) => Some(retrieve_mac(state)?),
            None => None,
        };

        Ok(build_qemu_args(
            &self.config,
            HostInfo::current(),
            cmdline.as_deref(),
            mac.as_ref(),
        ))
    }

    /// Run QEMU to completion.
    ///
    /// Without a GUI the guest console is attached to this terminal.
    pub fn run(&self) -> Result<()> {
        let args = self.prepare()?;

        tracing::info!(
            qemu = %self.qemu_bin.display(),
            image = %self.config.path.display(),
            cpus = self.config.cpus,
            memory_mb = self.config.memory_mb,
            kvm = self.config.kvm,
            "Starting QEMU"
        );
        tracing::debug!(?args, "QEMU arguments");

        let mut cmd = Command::new(&self.qemu_bin);
        cmd.args(&args);
        if self.config.gui {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }

        let status = cmd.status().map_err(|e| BootError::LaunchError {
            message: format!("Failed to start {}: {}", self.qemu_bin.display(), e),
            hint: None,
        })?;

        if !status.success() {
            return Err(BootError::LaunchError {
                message: format!("QEMU exited with {}", status),
                hint: None,
            });
        }
        Ok(())
    }
}

/// Find `qemu-system-<arch>` on `PATH`.
pub fn find_qemu(arch: &str) -> Result<PathBuf> {
    let name = format!("qemu-system-{}", arch);
    let paths = std::env::var_os("PATH").unwrap_or_default();
    find_in_path(&name, &paths).ok_or_else(|| BootError::LaunchError {
        message: format!("Unable to find {} within the $PATH", name),
        hint: Some(format!("Install QEMU with support for {} guests", arch)),
    })
}

fn find_in_path(name: &str, paths: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::network::{Networking, MAC_ADDR_FILE};
    use tempfile::TempDir;

    fn image(dir: &TempDir, cmdline: Option<&str>) -> QemuConfig {
        let prefix = dir.path().join("android");
        std::fs::write(dir.path().join("android-kernel"), b"K").unwrap();
        std::fs::write(dir.path().join("android-initrd.img"), b"I").unwrap();
        if let Some(cmdline) = cmdline {
            std::fs::write(dir.path().join("android-cmdline"), cmdline).unwrap();
        }
        let mut config = QemuConfig::new(prefix);
        config.qemu_bin_path = Some(PathBuf::from("/usr/bin/qemu-system-x86_64"));
        config
    }

    #[test]
    fn test_missing_kernel_refused() {
        let dir = TempDir::new().unwrap();
        let mut config = QemuConfig::new(dir.path().join("absent"));
        config.qemu_bin_path = Some(PathBuf::from("qemu"));
        let err = QemuLauncher::new(config).err().unwrap();
        assert!(err.to_string().contains("Could not find kernel image"));
    }

    #[test]
    fn test_prepare_creates_state_and_reads_cmdline() {
        let dir = TempDir::new().unwrap();
        let config = image(&dir, Some("console=ttyS0"));
        let state = config.state_path.clone();
        let launcher = QemuLauncher::new(config).unwrap();

        let args = launcher.prepare().unwrap();
        assert!(state.is_dir());
        assert!(state.join(MAC_ADDR_FILE).is_file());
        let append = args.iter().position(|a| a == "-append").unwrap();
        assert_eq!(args[append + 1], "console=ttyS0");
    }

    #[test]
    fn test_prepare_without_cmdline() {
        let dir = TempDir::new().unwrap();
        let mut config = image(&dir, None);
        config.networking = Networking::None;
        let state = config.state_path.clone();
        let launcher = QemuLauncher::new(config).unwrap();

        let args = launcher.prepare().unwrap();
        assert!(!args.iter().any(|a| a == "-append"));
        assert!(!state.join(MAC_ADDR_FILE).exists());
    }

    #[test]
    fn test_mac_stable_across_runs() {
        let dir = TempDir::new().unwrap();
        let launcher = QemuLauncher::new(image(&dir, None)).unwrap();
        let first = launcher.prepare().unwrap();
        let second = launcher.prepare().unwrap();
        let device = |args: &[String]| {
            args.iter()
                .find(|a| a.starts_with("virtio-net-pci"))
                .cloned()
                .unwrap()
        };
        assert_eq!(device(&first), device(&second));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = image(&dir, None);
        config.networking = Networking::Bridge("br0".to_string());
        config.published_ports = vec!["80:80".parse().unwrap()];
        assert!(QemuLauncher::new(config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("qemu-system-riscv64");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let paths = std::env::join_paths([PathBuf::from("/nonexistent"), dir.path().to_path_buf()])
            .unwrap();
        assert_eq!(find_in_path("qemu-system-riscv64", &paths), Some(bin));
        assert_eq!(find_in_path("qemu-system-sparc", &paths), None);
    }
}
