//! Provenance primitives for spindle artefacts.
//!
//! `spindle-attest` models typed in-toto statements, per-file VCS path
//! checks (Git today), and the registry that binds statements to the
//! files they predicate over. The packager consumes the registry
//! read-only and serialises it as a newline-delimited statement stream.

pub mod digest;
pub mod error;
pub mod predicates;
pub mod registry;
pub mod statement;
pub mod summary;
pub mod vcs;

pub use digest::Sha256Digest;
pub use error::AttestError;
pub use registry::{Mutations, PathCheckerRegistry, RegistryKey};
pub use statement::{Statement, Subject};
pub use vcs::detect_vcs;
