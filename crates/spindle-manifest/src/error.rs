//! Error types for the manifest pipeline.

use std::path::PathBuf;

use spindle_attest::AttestError;
use spindle_oci::OciError;

/// Errors from loading, scanning, resolving, updating, and packaging.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The input directory held no `.json`/`.yaml`/`.yml` files.
    #[error("no eligible manifest files found in {0:?}")]
    NoEligibleFiles(PathBuf),

    /// An image reached dedup without a resolved digest.
    #[error("image {0} has no digest")]
    MissingDigest(String),

    /// Two relation entries were recorded for the same reference.
    #[error("unexpected duplicate relation entry for {reference:?} (current value {current:?}, new value {new:?})")]
    DuplicateRelation {
        reference: String,
        current: String,
        new: String,
    },

    /// Two update rounds produced the same (path, digest) mutation key.
    #[error("mutation already recorded for {path:?} (sha256:{digest})")]
    DuplicateMutation { path: String, digest: String },

    /// A manifest group had nothing to rewrite.
    #[error("no images to update in {0:?}")]
    NoImages(String),

    /// A manifest could not be parsed or rewritten.
    #[error("failed to process {path:?}: {reason}")]
    Parse { path: String, reason: String },

    /// I/O failure with the triggering path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Attest(#[from] AttestError),

    #[error(transparent)]
    Oci(#[from] OciError),
}
