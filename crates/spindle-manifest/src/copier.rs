//! Copying resolved images into the output repository.
//!
//! Destination tags are derived, not invented: Cosign artefact tags are
//! preserved verbatim so signature discovery keeps working against the
//! destination repository, and everything else becomes `app.` plus the
//! SHA-256 of the original `name:tag` pair.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;

use spindle_oci::artefact::APP_IMAGE_TAG_PREFIX;
use spindle_oci::Client;

use crate::error::ManifestError;
use crate::image::Image;
use crate::list::ImageList;

fn cosign_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^sha256-[0-9a-f]{64}\.(sig|att|sbom)$")
            .unwrap_or_else(|e| unreachable!("static pattern must compile: {e}"))
    })
}

/// Whether a tag names a Cosign-style related artefact.
pub fn is_cosign_artifact_tag(tag: &str) -> bool {
    cosign_tag_pattern().is_match(tag)
}

/// Derive the destination tag for an image.
pub fn make_destination_tag(original_name: &str, original_tag: &str) -> String {
    if is_cosign_artifact_tag(original_tag) {
        return original_tag.to_owned();
    }
    let mut hasher = Sha256::new();
    hasher.update(original_name.as_bytes());
    hasher.update(b":");
    hasher.update(original_tag.as_bytes());
    format!("{APP_IMAGE_TAG_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Point every image at the destination repository under its derived tag.
pub fn set_new_image_refs(destination: &str, images: &mut [Image]) {
    for image in images {
        image.new_name = destination.to_owned();
        image.new_tag = make_destination_tag(&image.original_name, &image.original_tag);
    }
}

pub struct RegistryCopier<'a> {
    client: &'a Client,
    destination: String,
}

impl<'a> RegistryCopier<'a> {
    pub fn new(client: &'a Client, destination: impl Into<String>) -> Self {
        Self {
            client,
            destination: destination.into(),
        }
    }

    /// Copy every image in every list to the destination repository,
    /// returning the digest-pinned destination references.
    pub async fn copy_images(
        &self,
        cancel: &CancellationToken,
        lists: Vec<&mut ImageList>,
    ) -> Result<Vec<String>, ManifestError> {
        let mut references = Vec::new();
        for list in lists {
            set_new_image_refs(&self.destination, list.items_mut());
            for image in list.items() {
                let new_ref = format!("{}:{}", image.new_name, image.new_tag);
                tracing::info!(
                    from = %image.reference(true),
                    to = %new_ref,
                    "copying image"
                );
                self.client
                    .copy(cancel, &image.reference(true), &new_ref, &image.digest)
                    .await?;
                references.push(format!("{new_ref}@{}", image.digest));
            }
        }
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_tag_is_stable() {
        let tag = make_destination_tag("ghcr.io/fluxcd/source-controller", "v0.31.0");
        assert!(tag.starts_with(APP_IMAGE_TAG_PREFIX));
        assert_eq!(tag.len(), APP_IMAGE_TAG_PREFIX.len() + 64);
        assert_eq!(
            tag,
            make_destination_tag("ghcr.io/fluxcd/source-controller", "v0.31.0")
        );
        // the hash covers exactly "name:tag"
        let expected = hex::encode(Sha256::digest(
            b"ghcr.io/fluxcd/source-controller:v0.31.0",
        ));
        assert_eq!(tag, format!("{APP_IMAGE_TAG_PREFIX}{expected}"));
    }

    #[test]
    fn distinct_inputs_get_distinct_tags() {
        let a = make_destination_tag("ghcr.io/org/app", "v1");
        let b = make_destination_tag("ghcr.io/org/app", "v2");
        let c = make_destination_tag("ghcr.io/org/other", "v1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cosign_tags_pass_through() {
        let digest_hex = "a".repeat(64);
        for suffix in ["sig", "att", "sbom"] {
            let tag = format!("sha256-{digest_hex}.{suffix}");
            assert!(is_cosign_artifact_tag(&tag));
            assert_eq!(make_destination_tag("ghcr.io/org/app", &tag), tag);
        }
        assert!(!is_cosign_artifact_tag("v1.2.3"));
        assert!(!is_cosign_artifact_tag("sha256-0011.sig"));
        assert!(!is_cosign_artifact_tag(&format!("sha256-{digest_hex}.json")));
    }

    #[test]
    fn set_new_image_refs_rewrites_all() {
        let mut images = vec![
            Image {
                original_name: "ghcr.io/org/app".to_owned(),
                original_tag: "v1".to_owned(),
                ..Image::default()
            },
            Image {
                original_name: "ghcr.io/org/other".to_owned(),
                original_tag: format!("sha256-{}.sig", "b".repeat(64)),
                ..Image::default()
            },
        ];
        set_new_image_refs("example.test/out", &mut images);
        assert_eq!(images[0].new_name, "example.test/out");
        assert!(images[0].new_tag.starts_with(APP_IMAGE_TAG_PREFIX));
        assert_eq!(images[1].new_tag, images[1].original_tag);
    }
}
