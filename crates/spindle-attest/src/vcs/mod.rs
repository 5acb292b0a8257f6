//! VCS path checking.
//!
//! A provider answers three questions about a path: does it live inside
//! a repository, does its content match the committed tree, and what
//! does the surrounding repository look like. Git is the only provider
//! today; the trait keeps the registry provider-agnostic.

pub mod git;

use std::path::{Path, PathBuf};

use crate::digest::Sha256Digest;
use crate::error::AttestError;
use crate::registry::PathCheckerRegistry;
use crate::summary::PathCheckSummary;

/// Per-path VCS capability.
pub trait PathChecker {
    fn provider_name(&self) -> &'static str;

    /// Walk parent directories looking for an enclosing repository.
    fn detect_repo(&mut self) -> Result<bool, AttestError>;

    /// Returns `(checked, unmodified)`: whether the path resolves to an
    /// object in `HEAD`'s tree, and whether the working-tree content
    /// matches it.
    fn check(&mut self) -> Result<(bool, bool), AttestError>;

    fn make_summary(&mut self) -> Result<PathCheckSummary, AttestError>;
}

/// Constructor for per-file checkers bound to a registry.
pub type NewPathChecker = fn(PathBuf, Sha256Digest) -> Box<dyn PathChecker>;

/// Probe all known providers for a repository containing `path` and
/// return an initialised registry for the first that matches, or `None`
/// when the path is not under version control.
pub fn detect_vcs(path: &Path) -> Result<Option<PathCheckerRegistry>, AttestError> {
    let mut checker = git::GitPathChecker::new(path.to_path_buf(), Sha256Digest::default());
    if checker.detect_repo()? {
        tracing::debug!(path = %path.display(), provider = git::PROVIDER_NAME, "detected repository");
        let mut registry = PathCheckerRegistry::new(path, git::new_path_checker);
        registry.init()?;
        return Ok(Some(registry));
    }
    tracing::debug!(path = %path.display(), "no repository detected");
    Ok(None)
}
