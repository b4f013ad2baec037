//! Canonical archive splitting.

use std::io::Read;

use bootkit_core::error::{BootError, Result};
use tar::Archive;

use super::{CMDLINE_ENTRY, INITRD_ENTRY, KERNEL_ENTRY};

/// Kernel, initrd and command line read back from a canonical archive.
///
/// Missing entries are left empty; deciding whether that is fatal is up to
/// the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootArtifacts {
    pub kernel: Vec<u8>,
    pub initrd: Vec<u8>,
    pub cmdline: String,
}

impl BootArtifacts {
    pub fn has_kernel(&self) -> bool {
        !self.kernel.is_empty()
    }

    pub fn has_initrd(&self) -> bool {
        !self.initrd.is_empty()
    }
}

/// Scan a canonical boot archive and collect its boot entries.
///
/// The `boot/` directory and unknown entries are skipped. If an entry
/// occurs more than once the last one wins. Structural tar errors,
/// including truncated bodies, are returned as errors.
pub fn split_boot_archive<R: Read>(reader: R) -> Result<BootArtifacts> {
    let mut archive = Archive::new(reader);
    let mut artifacts = BootArtifacts::default();

    let entries = archive
        .entries()
        .map_err(|e| BootError::ArchiveError(format!("reading boot archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| BootError::ArchiveError(format!("reading boot archive: {}", e)))?;
        let path = entry.path_bytes().into_owned();

        match path.as_slice() {
            p if p == KERNEL_ENTRY.as_bytes() => {
                tracing::info!("process kernel");
                artifacts.kernel = read_body(&mut entry)?;
            }
            p if p == CMDLINE_ENTRY.as_bytes() => {
                let body = read_body(&mut entry)?;
                artifacts.cmdline = String::from_utf8_lossy(&body).into_owned();
            }
            p if p == INITRD_ENTRY.as_bytes() => {
                tracing::info!("process initrd.img");
                artifacts.initrd = read_body(&mut entry)?;
            }
            _ => {
                tracing::trace!(entry = %String::from_utf8_lossy(&path), "Skipping entry");
            }
        }
    }

    Ok(artifacts)
}

fn read_body<R: Read>(entry: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    entry
        .read_to_end(&mut body)
        .map_err(|e| BootError::ArchiveError(format!("reading entry body: {}", e)))?;
    Ok(body)
}
