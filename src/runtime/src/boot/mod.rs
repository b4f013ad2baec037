//! Boot image assembly and splitting.
//!
//! The canonical boot archive is an ordinary tar stream with a fixed
//! layout:
//!
//! ```text
//! boot/              directory, written once
//! boot/cmdline       kernel command line (text)
//! boot/kernel        kernel binary, mode copied from the source image
//! boot/initrd.img    initrd binary, mode copied from the source image
//! ```
//!
//! [`BootImageAssembler`] produces it from container image exports via a
//! [`TarStreamFilter`]; [`split_boot_archive`] reads it back into
//! [`BootArtifacts`].

mod assembler;
mod filter;
mod splitter;
mod tar_writer;

pub use assembler::{BootImageAssembler, BuildPlan, KernelSpec};
pub use filter::{FilterStats, Route, RoutingTable, TarStreamFilter};
pub use splitter::{split_boot_archive, BootArtifacts};
pub use tar_writer::{TarSink, TarWriter};

/// Directory entry that precedes the boot files.
pub const BOOT_DIR: &str = "boot/";

/// Kernel binary entry.
pub const KERNEL_ENTRY: &str = "boot/kernel";

/// Kernel command line entry.
pub const CMDLINE_ENTRY: &str = "boot/cmdline";

/// Initrd entry.
pub const INITRD_ENTRY: &str = "boot/initrd.img";

/// Name of the kernel file at the root of a kernel image.
pub const KERNEL_SOURCE: &str = "kernel";

/// Name of the initrd file at the root of an image.
pub const INITRD_SOURCE: &str = "initrd.img";
