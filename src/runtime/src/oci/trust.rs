//! Content trust policy.
//!
//! Decides whether verification must be requested from the fetch
//! collaborator before an image is pulled. The decision is made on the
//! reference exactly as written in the config.

use bootkit_core::config::TrustConfig;

/// Organization assumed for bare names like `nginx`.
const DEFAULT_ORG: &str = "library";

/// Tag separator; the first occurrence splits name from tag.
const TAG_SEPARATOR: char = ':';

/// Digest separator.
const DIGEST_SEPARATOR: &str = "@sha256:";

/// Whether `reference` must be pulled with content trust enabled.
///
/// Image rules are checked before organization rules; any matching rule is
/// sufficient. An image rule matches the reference exactly, or the part
/// before the first `:`, or the part before `@sha256:`.
pub fn requires_trust(reference: &str, config: &TrustConfig) -> bool {
    if config.image.iter().any(|img| image_matches(img, reference)) {
        return true;
    }

    match image_org(reference) {
        Some(org) => config.org.iter().any(|o| o == org),
        None => false,
    }
}

fn image_matches(rule: &str, reference: &str) -> bool {
    if rule == reference {
        return true;
    }
    if let Some((name, _)) = reference.split_once(TAG_SEPARATOR) {
        if rule == name {
            return true;
        }
    }
    if let Some((name, _)) = reference.split_once(DIGEST_SEPARATOR) {
        if rule == name {
            return true;
        }
    }
    false
}

/// Organization of a reference, derived from its `/`-separated segments.
///
/// - `nginx` → `library`
/// - `org/name` → `org`
/// - `registry/org/name...` → `org`
///
/// An empty reference has no organization.
pub fn image_org(reference: &str) -> Option<&str> {
    if reference.is_empty() {
        return None;
    }
    let segments: Vec<&str> = reference.split('/').collect();
    match segments.len() {
        1 => Some(DEFAULT_ORG),
        2 => Some(segments[0]),
        _ => Some(segments[1]),
    }
}
