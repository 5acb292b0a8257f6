//! OCI image reference parsing and splitting.
//!
//! Parses references like `ghcr.io/fluxcd/source-controller:v0.31.0` into
//! structured components, and splits raw manifest strings into
//! (name, tag, digest) without applying registry defaults.

use crate::error::OciError;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Split a raw image reference into `(name, tag, digest)`.
///
/// The digest is everything after the last `@`; the tag is everything
/// after the last `:` that follows the last `/`. A `:` in the first
/// component followed only by digits is treated as a registry port, not
/// a tag separator. Missing parts come back as empty strings — no
/// defaults are applied, so the output can be recomposed into exactly
/// the input.
pub fn split_ref(reference: &str) -> (String, String, String) {
    let (name_tag, digest) = match reference.rfind('@') {
        Some(at) => (&reference[..at], reference[at + 1..].to_owned()),
        None => (reference, String::new()),
    };

    let colon = match name_tag.rfind('/') {
        Some(slash) => name_tag[slash + 1..].rfind(':').map(|c| slash + 1 + c),
        None => name_tag.rfind(':').filter(|&c| {
            // registry:port without a slash is a name, not a tag
            !name_tag[c + 1..].chars().all(|ch| ch.is_ascii_digit())
                || name_tag[c + 1..].is_empty()
        }),
    };

    match colon {
        Some(c) => (
            name_tag[..c].to_owned(),
            name_tag[c + 1..].to_owned(),
            digest,
        ),
        None => (name_tag.to_owned(), String::new(), digest),
    }
}

/// Validate an output repository name: non-empty, all-lowercase, and
/// carrying neither tag nor digest.
pub fn validate_output_image(name: &str) -> Result<(), OciError> {
    let invalid = |reason: &str| OciError::InvalidFlag {
        flag: "output-image",
        value: name.to_owned(),
        reason: reason.to_owned(),
    };
    let (repo, tag, digest) = split_ref(name);
    if !tag.is_empty() {
        return Err(invalid("tag shouldn't be specified"));
    }
    if !digest.is_empty() {
        return Err(invalid("digest shouldn't be specified"));
    }
    if repo.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if repo.to_lowercase() != repo {
        return Err(invalid("must not contain upper case characters"));
    }
    Ok(())
}

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Registry hostname (e.g. "ghcr.io", "docker.io").
    pub registry: String,
    /// Repository path (e.g. "fluxcd/source-controller").
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    pub fn parse(reference: &str) -> Result<Self, OciError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OciError::InvalidReference {
                reference: reference.to_owned(),
                reason: "empty reference".to_owned(),
            });
        }

        let (name, tag, digest) = split_ref(reference);
        if let Some(rest) = digest.strip_prefix("sha256:") {
            if rest.len() != 64 || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(OciError::InvalidReference {
                    reference: reference.to_owned(),
                    reason: "digest is not a sha256 hex value".to_owned(),
                });
            }
        } else if !digest.is_empty() {
            return Err(OciError::InvalidReference {
                reference: reference.to_owned(),
                reason: "digest must use the sha256 algorithm".to_owned(),
            });
        }

        let (registry, repository) = split_registry_repository(&name, reference)?;

        Ok(Self {
            registry,
            repository,
            tag: if tag.is_empty() { None } else { Some(tag) },
            digest: if digest.is_empty() { None } else { Some(digest) },
        })
    }

    /// The tag-or-digest component used in manifest URLs. Digests win
    /// over tags so digest-pinned references stay immutable.
    pub fn manifest_reference(&self) -> String {
        if let Some(digest) = &self.digest {
            return digest.clone();
        }
        self.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_owned())
    }

    pub fn full_reference(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_reference())
    }
}

fn split_registry_repository(
    name: &str,
    reference: &str,
) -> Result<(String, String), OciError> {
    if let Some(slash) = name.find('/') {
        let first = &name[..slash];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repository = &name[slash + 1..];
            if repository.is_empty() {
                return Err(OciError::InvalidReference {
                    reference: reference.to_owned(),
                    reason: "empty repository".to_owned(),
                });
            }
            return Ok((first.to_owned(), repository.to_owned()));
        }
    }

    // no registry component detected
    let repository = if name.contains('/') {
        name.to_owned()
    } else {
        format!("library/{name}")
    };
    Ok((DEFAULT_REGISTRY.to_owned(), repository))
}
