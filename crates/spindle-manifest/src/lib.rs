//! The spindle manifest pipeline.
//!
//! Loads a directory of Kubernetes-style manifests into a scratch copy,
//! scans it for image references with exact positions, resolves those
//! references to registry digests, copies every image into a single
//! output repository under deterministic tags, rewrites the manifests to
//! the pinned form, and hands the result to the artefact packager.

pub mod alias;
pub mod attestation;
pub mod copier;
pub mod error;
pub mod image;
pub mod list;
pub mod loader;
pub mod packager;
pub mod resolver;
pub mod scanner;
pub mod updater;

pub use alias::{AliasCache, AliasMatch};
pub use copier::RegistryCopier;
pub use error::ManifestError;
pub use image::{Image, Source};
pub use list::ImageList;
pub use loader::ManifestLoader;
pub use packager::Packager;
pub use resolver::RegistryResolver;
pub use scanner::ImageScanner;
pub use updater::FileUpdater;
