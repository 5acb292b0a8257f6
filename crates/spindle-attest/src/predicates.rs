//! Typed statement predicates.
//!
//! One variant per predicate type; the type URI is part of the exported
//! envelope so a round-trip decoder can dispatch by it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::summary::PathCheckSummaryCollection;

pub const ORIGINAL_IMAGE_REF_PREDICATE_TYPE: &str = "docker.com/tape/OriginalImageRef/v0.1";
pub const RESOLVED_IMAGE_REF_PREDICATE_TYPE: &str = "docker.com/tape/ResolvedImageRef/v0.1";
pub const REPLACED_IMAGE_REF_PREDICATE_TYPE: &str = "docker.com/tape/ReplacedImageRef/v0.1";
pub const MANIFEST_DIR_PREDICATE_TYPE: &str = "docker.com/tape/ManifestDir/v0.2";

/// An image reference together with the position it was found at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRefWithLocation {
    pub reference: String,
    pub line: usize,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImageRefWithLocation {
    fn compare(&self, other: &Self) -> Ordering {
        self.reference
            .cmp(&other.reference)
            .then_with(|| self.line.cmp(&other.line))
            .then_with(|| self.column.cmp(&other.column))
    }
}

/// The manifest directory and the VCS state of everything inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDirectory {
    pub path: String,
    #[serde(rename = "vcsEntries")]
    pub vcs_entries: Option<PathCheckSummaryCollection>,
}

impl SourceDirectory {
    fn compare(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path).then_with(|| {
            match (&self.vcs_entries, &other.vcs_entries) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.compare(b),
            }
        })
    }
}

/// A statement predicate, tagged by its in-toto predicate type.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    OriginalImageRef(ImageRefWithLocation),
    ResolvedImageRef(ImageRefWithLocation),
    ReplacedImageRef(ImageRefWithLocation),
    ManifestDir(SourceDirectory),
}

impl Predicate {
    pub fn predicate_type(&self) -> &'static str {
        match self {
            Predicate::OriginalImageRef(_) => ORIGINAL_IMAGE_REF_PREDICATE_TYPE,
            Predicate::ResolvedImageRef(_) => RESOLVED_IMAGE_REF_PREDICATE_TYPE,
            Predicate::ReplacedImageRef(_) => REPLACED_IMAGE_REF_PREDICATE_TYPE,
            Predicate::ManifestDir(_) => MANIFEST_DIR_PREDICATE_TYPE,
        }
    }

    /// The predicate payload in its exported shape: the inner value is
    /// wrapped in a field named after what happened to the reference.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Predicate::OriginalImageRef(r) => {
                serde_json::json!({ "foundImageReference": r })
            }
            Predicate::ResolvedImageRef(r) => {
                serde_json::json!({ "resolvedImageReference": r })
            }
            Predicate::ReplacedImageRef(r) => {
                serde_json::json!({ "replacedImageReference": r })
            }
            Predicate::ManifestDir(d) => {
                serde_json::json!({ "containedInDirectory": d })
            }
        }
    }

    /// Structural comparison. Every variant defines one, so no encoded
    /// fallback is needed; cross-variant comparison falls back to the
    /// predicate type URI.
    pub fn compare(&self, other: &Predicate) -> Ordering {
        match (self, other) {
            (Predicate::OriginalImageRef(a), Predicate::OriginalImageRef(b))
            | (Predicate::ResolvedImageRef(a), Predicate::ResolvedImageRef(b))
            | (Predicate::ReplacedImageRef(a), Predicate::ReplacedImageRef(b)) => a.compare(b),
            (Predicate::ManifestDir(a), Predicate::ManifestDir(b)) => a.compare(b),
            _ => self.predicate_type().cmp(other.predicate_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wraps_reference_by_kind() {
        let location = ImageRefWithLocation {
            reference: "docker.io/library/nginx:1.25".to_owned(),
            line: 12,
            column: 16,
            alias: None,
        };
        let payload = Predicate::OriginalImageRef(location.clone()).payload();
        assert!(payload.get("foundImageReference").is_some());

        let payload = Predicate::ReplacedImageRef(location).payload();
        assert!(payload.get("replacedImageReference").is_some());
    }

    #[test]
    fn alias_is_omitted_when_absent() {
        let location = ImageRefWithLocation {
            reference: "nginx".to_owned(),
            line: 1,
            column: 1,
            alias: None,
        };
        let json = serde_json::to_string(&location).expect("serialize");
        assert!(!json.contains("alias"));
    }

    #[test]
    fn compare_orders_by_reference_then_position() {
        let a = ImageRefWithLocation {
            reference: "a".to_owned(),
            line: 5,
            column: 1,
            alias: None,
        };
        let b = ImageRefWithLocation {
            reference: "a".to_owned(),
            line: 7,
            column: 1,
            alias: None,
        };
        assert_eq!(
            Predicate::OriginalImageRef(a).compare(&Predicate::OriginalImageRef(b)),
            Ordering::Less
        );
    }
}
