//! Build configuration model.
//!
//! A build config names an optional kernel image with its boot command line,
//! an ordered list of init images, and the content trust rules applied
//! before images are fetched:
//!
//! ```yaml
//! kernel:
//!   image: example/kernel:5.10
//!   cmdline: "console=ttyS0"
//! init:
//!   - example/init:v1
//! trust:
//!   org:
//!     - example
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BootError, Result};

/// Top-level build configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Kernel image and command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelConfig>,

    /// Init images, folded into the archive in declaration order
    #[serde(default)]
    pub init: Vec<String>,

    /// Content trust rules
    #[serde(default)]
    pub trust: TrustConfig,
}

/// Kernel image descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelConfig {
    /// Image reference containing a `kernel` file at its root
    #[serde(default)]
    pub image: String,

    /// Kernel command line written to `boot/cmdline`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmdline: String,
}

/// Content trust configuration.
///
/// Empty lists mean trust is never required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// Image names, with or without tag or digest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image: Vec<String>,

    /// Organization names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub org: Vec<String>,
}

impl TrustConfig {
    /// Whether no trust rule is configured.
    pub fn is_empty(&self) -> bool {
        self.image.is_empty() && self.org.is_empty()
    }
}

impl BuildConfig {
    /// Parse and validate a YAML build configuration.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let config: BuildConfig = serde_yaml::from_str(source)
            .map_err(|e| BootError::ConfigError(format!("invalid configuration file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML build configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            BootError::ConfigError(format!(
                "Cannot open config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&source)
    }

    /// Check the structural rules the schema cannot express.
    ///
    /// Init images are only merged into a kernel's archive, so a config
    /// listing init images without a kernel is rejected.
    pub fn validate(&self) -> Result<()> {
        if let Some(kernel) = &self.kernel {
            if kernel.image.trim().is_empty() {
                return Err(BootError::ConfigError(
                    "kernel section requires a non-empty image".to_string(),
                ));
            }
        }

        if let Some(pos) = self.init.iter().position(|i| i.trim().is_empty()) {
            return Err(BootError::ConfigError(format!(
                "init image at position {} is empty",
                pos
            )));
        }

        if self.kernel.is_none() && !self.init.is_empty() {
            return Err(BootError::ConfigError(format!(
                "{} init image(s) configured without a kernel image",
                self.init.len()
            )));
        }

        Ok(())
    }

    /// Drop all content trust rules.
    pub fn disable_content_trust(&mut self) {
        tracing::debug!("Disabling content trust checks for this build");
        self.trust = TrustConfig::default();
    }
}
