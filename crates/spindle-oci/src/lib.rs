//! OCI distribution plumbing for spindle.
//!
//! A thin typed client over the registry HTTP API (digests, copies, tag
//! listings, blob and manifest transfer) plus the artefact codec that
//! packs a manifest directory and its attestations into a deterministic
//! two-layer image index.

pub mod artefact;
pub mod client;
pub mod error;
pub mod reference;

pub use artefact::{
    ArtefactInfo, PreparedArtefact, ATTEST_MEDIA_TYPE, CONFIG_MEDIA_TYPE, CONTENT_MEDIA_TYPE,
};
pub use client::{Client, IndexOrImage, RelatedTag};
pub use error::OciError;
pub use reference::{split_ref, validate_output_image, Reference};
