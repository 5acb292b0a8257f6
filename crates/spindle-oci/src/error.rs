//! Error types for registry and artefact operations.

use spindle_attest::AttestError;

/// Errors from the registry client and the artefact codec.
#[derive(Debug, thiserror::Error)]
pub enum OciError {
    /// A reference string could not be parsed.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A user-supplied flag failed validation.
    #[error("invalid {flag} flag value {value:?}: {reason}")]
    InvalidFlag {
        flag: &'static str,
        value: String,
        reason: String,
    },

    /// A digest read back from a registry disagrees with the expected one.
    #[error("unexpected digest mismatch: {expected} (expected) != {actual} (observed)")]
    DigestMismatch { expected: String, actual: String },

    /// An index unexpectedly carried no manifests.
    #[error("no manifests found in index {0:?}")]
    EmptyIndex(String),

    /// An image unexpectedly carried no layers.
    #[error("no layers found in image {0:?}")]
    NoLayers(String),

    /// An image carried more than the single expected layer.
    #[error("multiple layers found in image {0:?}")]
    MultipleLayers(String),

    /// A registry returned an unexpected status code.
    #[error("unexpected registry response for {url}: {status}")]
    UnexpectedStatus { url: String, status: u16 },

    /// Propagated network failure; never retried at this level.
    #[error("registry request failed: {0}")]
    Registry(#[from] reqwest::Error),

    /// Cooperative cancellation observed.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O failure while building or extracting artefacts.
    #[error("artefact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or index (de)serialization failure.
    #[error("failed to (de)serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Statement encoding failure while building the attestations layer.
    #[error(transparent)]
    Attest(#[from] AttestError),
}
