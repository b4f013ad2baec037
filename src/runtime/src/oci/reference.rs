//! Image reference parsing.
//!
//! Parses references like `docker.io/example/kernel:5.10` into structured
//! components while keeping the reference exactly as written. Trust checks
//! and image export operate on the written form; the parsed components are
//! used for validation and diagnostics.

use bootkit_core::error::{BootError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Reference as written in the config (trimmed)
    pub original: String,
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "example/kernel")
    pub repository: String,
    /// Tag (e.g., "latest", "5.10")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `example/kernel:5.10` → docker.io/example/kernel:5.10
    /// - `registry.example.com:5000/org/img` → registry.example.com:5000/org/img:latest
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let original = reference.trim();
        if original.is_empty() {
            return Err(BootError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }
        if original.chars().any(char::is_whitespace) {
            return Err(BootError::InvalidReference(format!(
                "'{}' contains whitespace",
                original
            )));
        }

        let (name_tag, digest) = match original.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(BootError::InvalidReference(format!(
                        "invalid digest in '{}': expected algorithm:hex",
                        original
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (original, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = tag {
            if tag.is_empty() {
                return Err(BootError::InvalidReference(format!(
                    "empty tag in '{}'",
                    original
                )));
            }
        }

        let (registry, repository) = split_registry_repository(name, original)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            original: original.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The reference exactly as written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Fully qualified reference with registry and default tag filled in.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

/// Split `name[:tag]`, only looking for the tag after the last `/` so that
/// a registry port is not mistaken for a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let colon = last_segment_start + colon;
            let candidate = &name_tag[colon + 1..];
            // `localhost:5000` without a path is a registry, not name:tag
            if last_segment_start == 0
                && !candidate.is_empty()
                && candidate.chars().all(|c| c.is_ascii_digit())
            {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(candidate))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str, original: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(BootError::InvalidReference(format!(
                    "empty repository in '{}'",
                    original
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(BootError::InvalidReference(format!(
            "empty path component in '{}'",
            original
        )));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
        assert_eq!(r.as_str(), "nginx");
    }

    #[test]
    fn test_parse_org_name_with_tag() {
        let r = ImageReference::parse("example/kernel:5.10").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "example/kernel");
        assert_eq!(r.tag, Some("5.10".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("registry.example.com/myorg/app:v1").unwrap();
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.repository, "myorg/app");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("myregistry.io:5000/myimage").unwrap();
        assert_eq!(r.registry, "myregistry.io:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse("ghcr.io/org/kernel@sha256:abcdef0123").unwrap();
        assert_eq!(r.repository, "org/kernel");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some("sha256:abcdef0123".to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("example/kernel:5.10@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("5.10".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
        assert_eq!(
            r.full_reference(),
            "docker.io/example/kernel:5.10@sha256:abcdef"
        );
    }

    #[test]
    fn test_display_keeps_original() {
        let r = ImageReference::parse("  nginx:1.25  ").unwrap();
        assert_eq!(r.to_string(), "nginx:1.25");
        assert_eq!(r.full_reference(), "docker.io/library/nginx:1.25");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            ImageReference::parse("   "),
            Err(BootError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_digest() {
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_tag() {
        assert!(ImageReference::parse("nginx:").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_path_component() {
        assert!(ImageReference::parse("example//kernel").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
    }

    #[test]
    fn test_parse_rejects_inner_whitespace() {
        assert!(ImageReference::parse("example/ker nel").is_err());
    }

    #[test]
    fn test_from_str() {
        let r: ImageReference = "example/init:v1".parse().unwrap();
        assert_eq!(r.repository, "example/init");
    }
}
