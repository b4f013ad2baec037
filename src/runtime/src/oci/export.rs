//! Filesystem export of container images.
//!
//! Images are materialized by an [`ImageExporter`], which produces the
//! flattened root filesystem of an image as a tar stream. The default
//! exporter drives the `docker` CLI.

use std::borrow::Cow;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use bootkit_core::error::{BootError, Result};
use tar::Archive;

use super::reference::ImageReference;
use crate::boot::TarSink;

/// Paths that container runtimes inject into every exported filesystem.
pub const EXCLUDED_PATHS: [&str; 9] = [
    ".dockerenv",
    "Dockerfile",
    "dev/console",
    "dev/pts",
    "dev/shm",
    "etc/hostname",
    "etc/hosts",
    "etc/mtab",
    "etc/resolv.conf",
];

/// Environment variable enabling content trust for `docker pull`.
const CONTENT_TRUST_ENV: &str = "DOCKER_CONTENT_TRUST";

/// Marker in `docker create` output for a missing local image.
const NO_SUCH_IMAGE: &str = "No such image";

/// Whether an exported entry must be dropped.
pub fn is_excluded(path: &[u8]) -> bool {
    EXCLUDED_PATHS.iter().any(|p| p.as_bytes() == path)
}

/// How an image is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Pull with content trust verification
    pub require_trust: bool,
    /// Pull even if the image is present locally
    pub force_pull: bool,
}

/// Source of image filesystem exports.
pub trait ImageExporter {
    /// Fetch `reference` into the local image store.
    fn pull(&self, reference: &ImageReference, trust: bool) -> Result<()>;

    /// Export the root filesystem of a locally present image as a tar
    /// stream and hand it to `consume`.
    ///
    /// Returns [`BootError::ImageNotFound`] without calling `consume` when
    /// the image is not present locally.
    fn export(
        &self,
        reference: &ImageReference,
        consume: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()>;
}

/// Export the filesystem of `reference`, pulling it first when required.
///
/// An image missing from the local store is pulled and exported once more;
/// a second miss is fatal. Errors raised by `consume` are returned as is.
pub fn fetch_filesystem(
    exporter: &dyn ImageExporter,
    reference: &ImageReference,
    options: FetchOptions,
    consume: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
) -> Result<()> {
    tracing::debug!(
        reference = %reference,
        trust = options.require_trust,
        pull = options.force_pull,
        "Fetching image filesystem"
    );

    if options.force_pull || options.require_trust {
        pull(exporter, reference, options.require_trust)?;
    }

    match exporter.export(reference, consume) {
        Err(BootError::ImageNotFound(_)) => {
            tracing::warn!(reference = %reference, "Image not found locally, pulling");
            pull(exporter, reference, options.require_trust)?;
            exporter
                .export(reference, consume)
                .map_err(|e| match e {
                    BootError::ImageNotFound(_) => BootError::FetchError {
                        reference: reference.to_string(),
                        message: "image not found after pull".to_string(),
                    },
                    other => other,
                })
        }
        result => result,
    }
}

fn pull(exporter: &dyn ImageExporter, reference: &ImageReference, trust: bool) -> Result<()> {
    exporter.pull(reference, trust).map_err(|e| match e {
        e @ BootError::FetchError { .. } => e,
        other => BootError::FetchError {
            reference: reference.to_string(),
            message: other.to_string(),
        },
    })
}

/// Stream the filesystem of `reference` into `sink`, skipping the entries
/// in [`EXCLUDED_PATHS`].
pub fn image_to_tar(
    exporter: &dyn ImageExporter,
    reference: &ImageReference,
    options: FetchOptions,
    sink: &mut dyn TarSink,
) -> Result<()> {
    fetch_filesystem(exporter, reference, options, &mut |reader| {
        let mut archive = Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| BootError::ArchiveError(format!("image export: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| BootError::ArchiveError(format!("image export: {}", e)))?;
            let path = entry.path_bytes().into_owned();

            if is_excluded(&path) {
                tracing::debug!(
                    reference = %reference,
                    entry = %String::from_utf8_lossy(&path),
                    "Excluding entry"
                );
                continue;
            }

            tracing::trace!(
                reference = %reference,
                entry = %String::from_utf8_lossy(&path),
                "Adding entry"
            );
            let link = entry.link_name_bytes().map(Cow::into_owned);
            let mut header = entry.header().clone();
            header.set_size(entry.size());
            sink.write_entry(&path, link.as_deref(), &header)?;
            io::copy(&mut entry, &mut *sink)?;
        }
        Ok(())
    })
}

/// Exporter backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerExporter {
    binary: PathBuf,
}

impl Default for DockerExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerExporter {
    /// Use `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker-compatible binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Run a docker subcommand to completion, returning trimmed stdout.
    fn output(&self, cmd: &mut Command, what: &str) -> Result<String> {
        let output = cmd.stdin(Stdio::null()).output().map_err(|e| {
            BootError::FetchError {
                reference: what.to_string(),
                message: format!("failed to run {}: {}", self.binary.display(), e),
            }
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BootError::FetchError {
                reference: what.to_string(),
                message: stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn create(&self, reference: &ImageReference) -> Result<String> {
        tracing::debug!(reference = %reference, "docker create");
        self.output(
            self.command()
                .arg("create")
                .arg(reference.as_str())
                .arg("/dev/null"),
            reference.as_str(),
        )
        .map_err(|e| match e {
            BootError::FetchError { message, .. } if message.contains(NO_SUCH_IMAGE) => {
                BootError::ImageNotFound(reference.to_string())
            }
            other => other,
        })
    }

    fn stream_export(
        &self,
        container: &str,
        consume: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        tracing::debug!(container, "docker export");
        let mut child = self
            .command()
            .arg("export")
            .arg(container)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BootError::FetchError {
                reference: container.to_string(),
                message: format!("failed to run docker export: {}", e),
            })?;

        let consumed = match child.stdout.take() {
            Some(mut stdout) => {
                let result = consume(&mut stdout);
                // Drain so the child is not killed by a closed pipe
                let _ = io::copy(&mut stdout, &mut io::sink());
                result
            }
            None => Err(BootError::FetchError {
                reference: container.to_string(),
                message: "docker export produced no output stream".to_string(),
            }),
        };

        let status = child.wait()?;
        consumed?;
        if !status.success() {
            return Err(BootError::FetchError {
                reference: container.to_string(),
                message: format!("docker export exited with {}", status),
            });
        }
        Ok(())
    }

    fn remove(&self, container: &str) -> Result<()> {
        tracing::debug!(container, "docker rm");
        self.output(self.command().arg("rm").arg(container), container)
            .map(|_| ())
    }
}

impl ImageExporter for DockerExporter {
    fn pull(&self, reference: &ImageReference, trust: bool) -> Result<()> {
        tracing::info!(reference = %reference, trust, "Pulling image");
        let mut cmd = self.command();
        cmd.arg("pull").arg(reference.as_str());
        if trust {
            cmd.env(CONTENT_TRUST_ENV, "1");
        }
        self.output(&mut cmd, reference.as_str()).map(|_| ())
    }

    fn export(
        &self,
        reference: &ImageReference,
        consume: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let container = self.create(reference)?;
        let exported = self.stream_export(&container, consume);
        let removed = self.remove(&container);
        exported?;
        removed
    }
}
