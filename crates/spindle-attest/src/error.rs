//! Error types for the attestation subsystem.

/// Errors from digest handling, VCS checks, and the statement registry.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    /// A digest set did not carry a `sha256` entry.
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    /// A path checker was registered twice for the same (path, digest) key.
    #[error("path checker already registered for {path:?} (sha256:{digest})")]
    AlreadyRegistered { path: String, digest: String },

    /// A statement subject does not correspond to any registered path.
    #[error("statement subject {name:?} (sha256:{digest}) is not relevant (path resolved to {resolved:?})")]
    IrrelevantSubject {
        name: String,
        digest: String,
        resolved: String,
    },

    /// The VCS object backing a path has a mode the checker cannot handle.
    #[error("unsupported VCS object at {path:?}: {mode}")]
    UnsupportedObject { path: String, mode: String },

    /// A summary was requested for a path that is not checked in.
    #[error("path {0:?} is not checked in")]
    NotChecked(String),

    /// Git repository access failed.
    #[error("git: {0}")]
    Git(String),

    /// The attestations-summary annotation could not be decoded.
    #[error("failed to decode attestations summary: {0}")]
    Summary(String),

    /// I/O error during attestation operations.
    #[error("attestation I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize a statement or summary.
    #[error("failed to serialize attestation: {0}")]
    Serialize(#[from] serde_json::Error),
}
