//! Per-path VCS check summaries and their same-repo grouping.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Sha256Digest;
use crate::statement::Subject;

/// Committed-object hashes for a checked path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tree_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_hash: String,
}

/// An unverified PGP signature found on a commit or annotated tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSignature {
    pub pgp: String,
    pub validated: bool,
}

/// A tag pointing at the checked-out `HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<GitSignature>,
}

/// The `HEAD` reference of the repository containing a checked path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub ref_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<GitTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<GitSignature>,
}

/// Git-specific detail attached to a [`PathCheckSummary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSummary {
    #[serde(default)]
    pub object: GitObject,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remotes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub reference: GitReference,
}

/// The VCS status of one path: whether it matches the committed tree,
/// where it sits relative to the repository root, and which repository
/// it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathCheckSummary {
    pub unmodified: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "isDir", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Sha256Digest::is_empty")]
    pub digest: Sha256Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSummary>,
}

impl PathCheckSummary {
    pub fn provider_name(&self) -> &'static str {
        if self.git.is_some() {
            crate::vcs::git::PROVIDER_NAME
        } else {
            "none"
        }
    }

    /// Two summaries describe the same repository when provider, primary
    /// URI, `HEAD` hash, and remote count all agree. Any mismatch, or a
    /// missing VCS detail on either side, means not-same-repo.
    pub fn same_repo(&self, other: &PathCheckSummary) -> bool {
        if self.provider_name() != other.provider_name() {
            return false;
        }
        if self.uri != other.uri {
            return false;
        }
        match (&self.git, &other.git) {
            (Some(a), Some(b)) => {
                a.reference.hash == b.reference.hash && a.remotes.len() == b.remotes.len()
            }
            _ => false,
        }
    }
}

/// Summaries partitioned into same-repo groups, each with the repository
/// base path at index 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathCheckSummaryCollection {
    pub providers: Vec<String>,
    #[serde(rename = "entryGroups")]
    pub entry_groups: Vec<Vec<PathCheckSummary>>,
}

impl PathCheckSummaryCollection {
    /// Group summaries by the same-repo relation. The first summary seen
    /// for each repository anchors its group; groups are ordered by
    /// (provider, anchor path) and members after the anchor by path.
    pub fn from_summaries(summaries: Vec<PathCheckSummary>) -> Self {
        let mut groups: Vec<Vec<PathCheckSummary>> = Vec::new();
        for summary in summaries {
            match groups.iter_mut().find(|g| summary.same_repo(&g[0])) {
                Some(group) => group.push(summary),
                None => groups.push(vec![summary]),
            }
        }

        let mut providers: Vec<String> = groups
            .iter()
            .map(|g| g[0].provider_name().to_owned())
            .collect();
        providers.sort();
        providers.dedup();

        groups.sort_by(|a, b| {
            a[0].provider_name()
                .cmp(b[0].provider_name())
                .then_with(|| a[0].path.cmp(&b[0].path))
        });
        for group in &mut groups {
            if group.len() > 1 {
                group[1..].sort_by(|a, b| a.path.cmp(&b.path));
            }
        }

        Self {
            providers,
            entry_groups: groups,
        }
    }

    /// Subjects for every entry that carries a digest.
    pub fn subjects(&self) -> Vec<Subject> {
        let mut subjects = Vec::new();
        for group in &self.entry_groups {
            for entry in group {
                if entry.digest.is_empty() {
                    continue;
                }
                subjects.push(Subject {
                    name: entry.path.clone(),
                    digest: entry.digest.clone(),
                });
            }
        }
        subjects
    }

    pub fn compare(&self, other: &PathCheckSummaryCollection) -> Ordering {
        self.providers
            .cmp(&other.providers)
            .then_with(|| self.entry_groups.len().cmp(&other.entry_groups.len()))
            .then_with(|| {
                for (a, b) in self.entry_groups.iter().zip(&other.entry_groups) {
                    let ordering = a[0]
                        .provider_name()
                        .cmp(b[0].provider_name())
                        .then_with(|| a[0].path.cmp(&b[0].path));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            })
    }
}
