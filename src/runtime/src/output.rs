//! Output artifacts.
//!
//! Converts a staged canonical boot archive into on-disk artifacts named
//! after a caller-chosen base path.

use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bootkit_core::error::{BootError, Result};

use crate::boot::{split_boot_archive, BootArtifacts};

/// Mode of every written artifact.
#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o644;

pub const KERNEL_SUFFIX: &str = "-kernel";
pub const INITRD_SUFFIX: &str = "-initrd.img";
pub const CMDLINE_SUFFIX: &str = "-cmdline";

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputFormat {
    /// `<base>-kernel`, `<base>-initrd.img` and `<base>-cmdline`
    KernelInitrd,
}

impl OutputFormat {
    /// Every known format.
    pub const ALL: [OutputFormat; 1] = [OutputFormat::KernelInitrd];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::KernelInitrd => "kernel+initrd",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| BootError::OutputError(format!("Unknown format type {}", s)))
    }
}

/// Names of the known output formats, sorted.
pub fn output_types() -> Vec<&'static str> {
    let mut types: Vec<_> = OutputFormat::ALL.iter().map(OutputFormat::as_str).collect();
    types.sort_unstable();
    types
}

/// Parse a list of format names, failing on the first unknown one.
pub fn validate_formats<S: AsRef<str>>(formats: &[S]) -> Result<Vec<OutputFormat>> {
    tracing::debug!(
        formats = ?formats.iter().map(AsRef::<str>::as_ref).collect::<Vec<_>>(),
        "Validating output formats"
    );
    formats
        .iter()
        .map(|f| f.as_ref().parse::<OutputFormat>())
        .collect()
}

/// `<base><suffix>`, without treating `base` as a directory.
pub fn artifact_path(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// Write every format in `formats` from the canonical archive at `archive`.
pub fn write_formats(base: &Path, archive: &Path, formats: &[OutputFormat]) -> Result<()> {
    tracing::debug!(base = %base.display(), ?formats, "Writing output formats");

    for format in formats {
        let file = File::open(archive).map_err(|e| {
            BootError::OutputError(format!("Cannot open {}: {}", archive.display(), e))
        })?;
        match format {
            OutputFormat::KernelInitrd => {
                let artifacts = split_boot_archive(file).map_err(|e| {
                    BootError::OutputError(format!("Error filtering kernel and initrd: {}", e))
                })?;
                write_kernel_initrd(base, &artifacts)?;
            }
        }
    }
    Ok(())
}

/// Write the kernel, initrd and command line artifacts for `base`.
///
/// A missing kernel is fatal. A missing initrd or command line is written
/// as an empty file.
pub fn write_kernel_initrd(base: &Path, artifacts: &BootArtifacts) -> Result<()> {
    if !artifacts.has_kernel() {
        return Err(BootError::OutputError(
            "canonical archive contains no kernel".to_string(),
        ));
    }
    if !artifacts.has_initrd() {
        tracing::warn!("Canonical archive contains no initrd, writing an empty one");
    }

    let kernel = artifact_path(base, KERNEL_SUFFIX);
    let initrd = artifact_path(base, INITRD_SUFFIX);
    let cmdline = artifact_path(base, CMDLINE_SUFFIX);
    tracing::info!(
        kernel = %kernel.display(),
        initrd = %initrd.display(),
        cmdline = %cmdline.display(),
        "Writing kernel+initrd"
    );

    write_artifact(&initrd, &artifacts.initrd)?;
    write_artifact(&kernel, &artifacts.kernel)?;
    write_artifact(&cmdline, artifacts.cmdline.as_bytes())
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(ARTIFACT_MODE);
    }

    let mut file = options.open(path).map_err(|e| {
        BootError::OutputError(format!("Cannot create {}: {}", path.display(), e))
    })?;
    file.write_all(contents).map_err(|e| {
        BootError::OutputError(format!("Error writing {}: {}", path.display(), e))
    })
}
