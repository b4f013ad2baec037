use std::fmt;

use thiserror::Error;

/// Stage of a boot image build, used to attribute wrapped errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Creating the scratch directory before any image is fetched
    Prepare,
    /// Extracting the kernel image
    Kernel,
    /// Folding an init image into the archive
    Init,
    /// Writing the end-of-archive marker
    Finalize,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Prepare => write!(f, "prepare"),
            BuildStage::Kernel => write!(f, "kernel"),
            BuildStage::Init => write!(f, "init"),
            BuildStage::Finalize => write!(f, "finalize"),
        }
    }
}

/// Bootkit error types
#[derive(Error, Debug)]
pub enum BootError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Image is not present in the local image store
    #[error("No such image: {0}")]
    ImageNotFound(String),

    /// Collaborator failed to produce a filesystem export
    #[error("Could not fetch image {reference}: {message}")]
    FetchError { reference: String, message: String },

    /// More than one source entry named `kernel` was seen
    #[error("found more than one possible kernel image")]
    DuplicateKernel,

    /// The archive was closed without a kernel entry
    #[error("did not find kernel in kernel image")]
    MissingKernel,

    /// Tar stream structure error
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Output artifact error
    #[error("Output error: {0}")]
    OutputError(String),

    /// VM launch failed
    #[error("VM launch failed: {message}")]
    LaunchError {
        message: String,
        hint: Option<String>,
    },

    /// A build stage failed
    #[error("{stage} stage failed for {target}: {source}")]
    Build {
        stage: BuildStage,
        target: String,
        #[source]
        source: Box<BootError>,
    },
}

impl BootError {
    /// Wrap an error with the build stage and target it occurred in.
    pub fn in_stage(self, stage: BuildStage, target: impl Into<String>) -> Self {
        BootError::Build {
            stage,
            target: target.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any build stage wrappers.
    pub fn root_cause(&self) -> &BootError {
        let mut current = self;
        while let BootError::Build { source, .. } = current {
            current = source;
        }
        current
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            BootError::Build { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for BootError {
    fn from(err: serde_yaml::Error) -> Self {
        BootError::SerializationError(err.to_string())
    }
}

/// Result type alias for bootkit operations
pub type Result<T> = std::result::Result<T, BootError>;
