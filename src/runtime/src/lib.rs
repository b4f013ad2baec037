//! Bootkit Runtime - boot image assembly pipeline.
//!
//! This module turns container image filesystem exports into a canonical
//! `boot/` tar archive, splits that archive back into kernel, initrd and
//! command line artifacts, and launches them under QEMU.

#![allow(clippy::result_large_err)]

pub mod boot;
pub mod oci;
pub mod output;
pub mod vmm;

// Re-export common types
pub use boot::{
    split_boot_archive, BootArtifacts, BootImageAssembler, BuildPlan, KernelSpec, Route,
    RoutingTable, TarSink, TarStreamFilter, TarWriter,
};
pub use oci::{
    fetch_filesystem, image_to_tar, requires_trust, DockerExporter, FetchOptions, ImageExporter,
    ImageReference, EXCLUDED_PATHS,
};
pub use output::{output_types, validate_formats, write_formats, write_kernel_initrd, OutputFormat};
pub use vmm::{Networking, PublishedPort, QemuConfig, QemuLauncher};

/// Bootkit Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory name of the default cache directory under `$HOME`.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".bootkit";

/// Default scratch/cache directory (`$HOME/.bootkit`).
pub fn default_cache_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(DEFAULT_CACHE_DIR_NAME)
}
