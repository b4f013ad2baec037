//! Boot image assembly.
//!
//! Streams the kernel image and then each init image, in declaration
//! order, through a single [`TarStreamFilter`] into one canonical archive.
//! Images are fetched and streamed one at a time.

use std::io::Write;
use std::path::{Path, PathBuf};

use bootkit_core::config::{BuildConfig, TrustConfig};
use bootkit_core::error::{BootError, BuildStage, Result};

use super::filter::{RoutingTable, TarStreamFilter};
use super::tar_writer::{TarSink, TarWriter};
use crate::oci::{image_to_tar, requires_trust, FetchOptions, ImageExporter, ImageReference};

/// Subdirectory of the cache directory reserved for scratch files.
const SCRATCH_DIR: &str = "tmp";

/// Target name used for errors raised while finalizing the archive.
const ARCHIVE_TARGET: &str = "canonical archive";

/// Kernel image and the command line to boot it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub reference: ImageReference,
    pub cmdline: String,
}

/// A validated build configuration with parsed image references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub kernel: Option<KernelSpec>,
    pub init: Vec<ImageReference>,
    pub trust: TrustConfig,
}

impl BuildPlan {
    /// Validate `config` and parse its image references.
    pub fn from_config(config: &BuildConfig) -> Result<Self> {
        config.validate()?;

        let kernel = match &config.kernel {
            Some(kernel) => Some(KernelSpec {
                reference: ImageReference::parse(&kernel.image).map_err(|e| {
                    BootError::ConfigError(format!("extract kernel image reference: {}", e))
                })?,
                cmdline: kernel.cmdline.clone(),
            }),
            None => None,
        };

        let init = config
            .init
            .iter()
            .map(|image| {
                ImageReference::parse(image).map_err(|e| {
                    BootError::ConfigError(format!("extract init image reference: {}", e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kernel,
            init,
            trust: config.trust.clone(),
        })
    }

    /// Number of images that will be fetched.
    pub fn image_count(&self) -> usize {
        self.init.len() + usize::from(self.kernel.is_some())
    }
}

/// Destination for image content during a build.
///
/// Init images can only be folded into an archive that has a kernel
/// filter; without a kernel only the empty archive can be produced.
enum BootSink<W: Write> {
    NoKernel(TarWriter<W>),
    KernelFilter(TarStreamFilter<W>),
}

/// Builds canonical boot archives.
pub struct BootImageAssembler<'a> {
    exporter: &'a dyn ImageExporter,
    cache_dir: PathBuf,
    force_pull: bool,
    routes: RoutingTable,
}

impl<'a> BootImageAssembler<'a> {
    /// Create an assembler fetching through `exporter` and keeping scratch
    /// files under `cache_dir`.
    pub fn new(exporter: &'a dyn ImageExporter, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            exporter,
            cache_dir: cache_dir.into(),
            force_pull: false,
            routes: RoutingTable::default(),
        }
    }

    /// Always pull images before exporting them.
    pub fn force_pull(mut self, force_pull: bool) -> Self {
        self.force_pull = force_pull;
        self
    }

    /// Replace the filter's routing table.
    pub fn with_routes(mut self, routes: RoutingTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Write the canonical archive for `plan` to `destination`.
    ///
    /// Any failure aborts the build; the partially written destination must
    /// be discarded by the caller.
    pub fn build<W: Write>(&self, plan: &BuildPlan, destination: W) -> Result<W> {
        let scratch = self.cache_dir.join(SCRATCH_DIR);
        std::fs::create_dir_all(&scratch).map_err(|e| {
            BootError::from(e).in_stage(BuildStage::Prepare, scratch.display().to_string())
        })?;

        let writer = TarWriter::new(destination);
        let sink = match &plan.kernel {
            Some(kernel) => {
                tracing::info!(reference = %kernel.reference, "Extract kernel image");
                let mut filter =
                    TarStreamFilter::with_routes(writer, kernel.cmdline.clone(), self.routes.clone());
                self.fetch_into(&kernel.reference, &plan.trust, &mut filter)
                    .and_then(|()| filter.check_kernel())
                    .map_err(|e| e.in_stage(BuildStage::Kernel, kernel.reference.as_str()))?;
                BootSink::KernelFilter(filter)
            }
            None => BootSink::NoKernel(writer),
        };

        let writer = match sink {
            BootSink::NoKernel(writer) => {
                if !plan.init.is_empty() {
                    return Err(BootError::ConfigError(format!(
                        "{} init image(s) configured without a kernel image",
                        plan.init.len()
                    )));
                }
                tracing::warn!("No kernel image configured, writing an empty archive");
                writer
            }
            BootSink::KernelFilter(mut filter) => {
                if !plan.init.is_empty() {
                    tracing::info!(count = plan.init.len(), "Add init containers");
                }
                for reference in &plan.init {
                    tracing::info!(reference = %reference, "Process init image");
                    self.fetch_into(reference, &plan.trust, &mut filter)
                        .map_err(|e| e.in_stage(BuildStage::Init, reference.as_str()))?;
                }
                filter
                    .close()
                    .map_err(|e| e.in_stage(BuildStage::Finalize, ARCHIVE_TARGET))?
            }
        };

        let entries = writer.entries();
        let destination = writer
            .finish()
            .map_err(|e| e.in_stage(BuildStage::Finalize, ARCHIVE_TARGET))?;
        tracing::debug!(entries, "Canonical archive written");
        Ok(destination)
    }

    fn fetch_into(
        &self,
        reference: &ImageReference,
        trust: &TrustConfig,
        sink: &mut dyn TarSink,
    ) -> Result<()> {
        let options = FetchOptions {
            require_trust: requires_trust(reference.as_str(), trust),
            force_pull: self.force_pull,
        };
        image_to_tar(self.exporter, reference, options, sink)
    }
}
