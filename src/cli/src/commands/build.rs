//! `bootkit build` command - assemble boot artifacts from a YAML config.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bootkit_core::config::BuildConfig;
use bootkit_runtime::{
    default_cache_dir, output_types, validate_formats, write_formats, BootImageAssembler,
    BuildPlan, DockerExporter,
};
use clap::Args;
use tempfile::NamedTempFile;

use crate::output::format_bytes;

#[derive(Args)]
pub struct BuildArgs {
    /// Build configuration file (YAML)
    pub config: PathBuf,

    /// Always pull images
    #[arg(long)]
    pub pull: bool,

    /// Skip image trust verification specified in the trust section of the config
    #[arg(long)]
    pub disable_content_trust: bool,

    #[arg(
        long = "format",
        value_delimiter = ',',
        default_value = "kernel+initrd",
        help = format!("Formats to create [ {} ]", output_types().join(" "))
    )]
    pub formats: Vec<String>,

    /// Cache directory for scratch files
    #[arg(long, env = "BOOTKIT_HOME")]
    pub cache_dir: Option<PathBuf>,

    /// Directory to write the outputs to
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

pub fn execute(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let formats =
        validate_formats(&args.formats).map_err(|e| format!("Error parsing formats: {e}"))?;

    let mut config = BuildConfig::from_file(&args.config)?;
    if args.disable_content_trust {
        config.disable_content_trust();
    }
    let plan = BuildPlan::from_config(&config)?;

    let cache_dir = args.cache_dir.unwrap_or_else(default_cache_dir);
    let base = output_base(&args.config, args.dir.as_deref())?;
    tracing::debug!(
        config = %args.config.display(),
        cache_dir = %cache_dir.display(),
        base = %base.display(),
        images = plan.image_count(),
        "Starting build"
    );

    let exporter = DockerExporter::new();
    let assembler = BootImageAssembler::new(&exporter, cache_dir).force_pull(args.pull);

    // Removed on drop, whether or not the build succeeds
    let staged = NamedTempFile::new().map_err(|e| format!("Error creating tempfile: {e}"))?;
    let mut out = BufWriter::new(staged.as_file());
    assembler.build(&plan, &mut out)?;
    out.flush()?;
    drop(out);

    let archive_size = staged.as_file().metadata()?.len();
    tracing::info!(size = %format_bytes(archive_size), "Create outputs");
    write_formats(&base, staged.path(), &formats)
        .map_err(|e| format!("Error writing outputs: {e}"))?;

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Build complete"
    );
    Ok(())
}

/// Output base path: the config file name without its extension, placed in
/// `dir` when given.
fn output_base(config: &Path, dir: Option<&Path>) -> Result<PathBuf, String> {
    let stem = config
        .file_stem()
        .ok_or_else(|| format!("Cannot derive an output name from {}", config.display()))?;
    Ok(match dir {
        Some(dir) => dir.join(stem),
        None => PathBuf::from(stem),
    })
}
