//! Remote artifact reference parsing.
//!
//! Parses references like `docker.io/gokrazy/sample:amd64` into structured components.
//!
//! Grammar (all three components required):
//!
//! ```text
//! reference  = registry "/" repository ":" tag
//! registry   = host [ ":" port ]          ; everything before the first "/"
//! repository = path-segment *( "/" path-segment )
//! tag        = 1*( ALPHA / DIGIT / "_" / "." / "-" )
//! ```

use gom_core::error::{MachineError, Result};

/// Parsed remote artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    /// Registry hostname (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "gokrazy/sample")
    pub repository: String,
    /// Tag (e.g., "amd64", "v0.1.0")
    pub tag: String,
}

impl ArtifactReference {
    /// Parse a reference string.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let invalid = |reason: &str| MachineError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (registry, rest) = reference
            .split_once('/')
            .ok_or_else(|| invalid("expected registry/repository:tag, missing '/'"))?;
        if registry.is_empty() {
            return Err(invalid("empty registry"));
        }

        // The tag separator is the last ':' after the last '/'
        let last_segment_start = rest.rfind('/').map_or(0, |pos| pos + 1);
        let colon = rest[last_segment_start..]
            .rfind(':')
            .map(|pos| last_segment_start + pos)
            .ok_or_else(|| invalid("expected registry/repository:tag, missing ':tag'"))?;

        let repository = &rest[..colon];
        let tag = &rest[colon + 1..];

        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        if repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path segment"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("tag may only contain letters, digits, '_', '.' and '-'"));
        }

        Ok(ArtifactReference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::str::FromStr for ArtifactReference {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let r = ArtifactReference::parse("docker.io/gokrazy/sample:amd64").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "gokrazy/sample");
        assert_eq!(r.tag, "amd64");
    }

    #[test]
    fn test_parse_single_segment_repository() {
        let r = ArtifactReference::parse("ghcr.io/machine:v1").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "machine");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ArtifactReference::parse("localhost:5000/org/image:test").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "org/image");
        assert_eq!(r.tag, "test");
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ArtifactReference::parse("ghcr.io/org/sub/image:v0.1.0").unwrap();
        assert_eq!(r.repository, "org/sub/image");
        assert_eq!(r.tag, "v0.1.0");
    }

    #[test]
    fn test_parse_whitespace_reference() {
        let r = ArtifactReference::parse("  ghcr.io/org/image:v1  ").unwrap();
        assert_eq!(r.full_reference(), "ghcr.io/org/image:v1");
    }

    #[test]
    fn test_parse_missing_components() {
        for bad in [
            "",
            "image:tag",
            "ghcr.io/org/image",
            "ghcr.io/org/image:",
            "/org/image:tag",
            "ghcr.io/:tag",
            "ghcr.io//image:tag",
            "localhost:5000/image",
        ] {
            let err = ArtifactReference::parse(bad).unwrap_err();
            assert!(
                matches!(err, MachineError::InvalidReference { .. }),
                "{bad:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_parse_invalid_tag() {
        assert!(ArtifactReference::parse("ghcr.io/org/image:v1@sha256").is_err());
    }

    #[test]
    fn test_display() {
        let r: ArtifactReference = "docker.io/gokrazy/sample:arm64".parse().unwrap();
        assert_eq!(format!("{}", r), "docker.io/gokrazy/sample:arm64");
    }
}
