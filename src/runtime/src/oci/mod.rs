//! Container image access.
//!
//! - [`ImageReference`]: parsed image references
//! - [`requires_trust`]: content trust policy
//! - [`ImageExporter`]: filesystem export of images as tar streams

mod export;
pub mod reference;
mod trust;

pub use export::{
    fetch_filesystem, image_to_tar, is_excluded, DockerExporter, FetchOptions, ImageExporter,
    EXCLUDED_PATHS,
};
pub use reference::ImageReference;
pub use trust::{image_org, requires_trust};
