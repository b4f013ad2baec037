//! Bootkit Core - Foundational Types
//!
//! This module provides the error type and the build configuration model
//! shared by the bootkit runtime and CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{BuildConfig, KernelConfig, TrustConfig};
pub use error::{BootError, BuildStage, Result};

/// Bootkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
