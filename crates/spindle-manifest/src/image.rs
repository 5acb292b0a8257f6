//! The image aggregate and its source occurrences.

use serde::Serialize;

use spindle_attest::Sha256Digest;

/// A discovered occurrence of an image reference inside a manifest file.
/// Immutable once created by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Manifest path relative to the scanned directory.
    pub manifest: String,
    #[serde(rename = "manifestDigest")]
    pub manifest_digest: Sha256Digest,
    pub line: usize,
    pub column: usize,
    /// Tree keys reaching the scalar, sequence markers dropped.
    #[serde(rename = "nodePath")]
    pub node_path: Vec<String>,
    /// The raw reference text as written in the manifest.
    #[serde(rename = "originalRef")]
    pub original_ref: String,
}

/// One image as referenced by one or more sources. The resolver fills
/// in the digest, the copier the new name/tag, the list the alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Image {
    pub sources: Vec<Source>,

    #[serde(rename = "originalName")]
    pub original_name: String,
    #[serde(rename = "originalTag")]
    pub original_tag: String,

    /// Registry digest in `sha256:<hex>` form; empty until resolved.
    pub digest: String,

    #[serde(rename = "newName")]
    pub new_name: String,
    #[serde(rename = "newTag")]
    pub new_tag: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Image {
    /// Compose `name[:tag][@digest]` from either the original or the
    /// rewritten coordinates.
    pub fn reference(&self, original: bool) -> String {
        let mut reference = if original {
            let mut r = self.original_name.clone();
            if !self.original_tag.is_empty() {
                r.push(':');
                r.push_str(&self.original_tag);
            }
            r
        } else {
            let mut r = self.new_name.clone();
            if !self.new_tag.is_empty() {
                r.push(':');
                r.push_str(&self.new_tag);
            }
            r
        };
        if !self.digest.is_empty() {
            reference.push('@');
            reference.push_str(&self.digest);
        }
        reference
    }

    fn primary_source(&self) -> Option<&Source> {
        self.sources.first()
    }

    /// Manifest path of the first source.
    pub fn manifest(&self) -> &str {
        self.primary_source().map_or("", |s| s.manifest.as_str())
    }

    pub fn manifest_digest(&self) -> Sha256Digest {
        self.primary_source()
            .map(|s| s.manifest_digest.clone())
            .unwrap_or_default()
    }

    /// Raw reference text of the first source.
    pub fn original_ref(&self) -> &str {
        self.primary_source().map_or("", |s| s.original_ref.as_str())
    }
}
