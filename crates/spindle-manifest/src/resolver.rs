//! Image resolution against registries.
//!
//! Bulk-resolves digests, discovers related tags by digest-prefix
//! convention, and walks multi-platform indices so per-platform
//! manifests (and their signatures) travel with the images they
//! belong to.

use oci_spec::image::ImageIndex;
use tokio_util::sync::CancellationToken;

use spindle_oci::Client;

use crate::error::ManifestError;
use crate::image::{Image, Source};
use crate::list::ImageList;

/// Callback invoked with each image's index manifest, letting callers
/// harvest inline attestations without a second fetch.
pub type IndexInspector<'a> =
    &'a mut dyn FnMut(&Image, &ImageIndex) -> Result<(), ManifestError>;

pub struct RegistryResolver<'a> {
    client: &'a Client,
}

impl<'a> RegistryResolver<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Resolve every image's digest. A digest already pinned in the
    /// manifest must agree with the registry; registries return exactly
    /// what a digest reference names, so disagreement is an integrity
    /// failure.
    pub async fn resolve_digests(
        &self,
        cancel: &CancellationToken,
        images: &mut ImageList,
    ) -> Result<(), ManifestError> {
        for image in images.items_mut() {
            let reference = image.reference(true);
            let digest = self.client.digest(cancel, &reference).await?;
            if !image.digest.is_empty() && image.digest != digest {
                return Err(spindle_oci::OciError::DigestMismatch {
                    expected: image.digest.clone(),
                    actual: digest,
                }
                .into());
            }
            tracing::debug!(reference = %reference, digest = %digest, "resolved digest");
            image.digest = digest;
        }
        Ok(())
    }

    /// Find tags related to each image (Cosign signatures,
    /// attestations, SBOMs), recording which image each belongs to.
    pub async fn find_related_tags(
        &self,
        cancel: &CancellationToken,
        images: &ImageList,
    ) -> Result<ImageList, ManifestError> {
        let mut related = ImageList::new(images.dir());
        for image in images.items() {
            for tag in self
                .client
                .list_related(cancel, &image.original_name, &image.digest)
                .await?
            {
                let synthetic = synthetic_image(image, &tag.tag, &tag.digest);
                related.append_with_relation_to(image, synthetic)?;
            }
        }
        related.dedup()?;
        Ok(related)
    }

    /// Walk each image's index manifest (if it is one): invoke the
    /// inspector, add one synthetic image per per-platform manifest,
    /// then discover tags related to those. Returns
    /// `(per-platform manifests, their related tags)`.
    pub async fn find_related_from_indices(
        &self,
        cancel: &CancellationToken,
        images: &ImageList,
        mut inspector: Option<IndexInspector<'_>>,
    ) -> Result<(ImageList, ImageList), ManifestError> {
        let mut manifests = ImageList::new(images.dir());
        for image in images.items() {
            let response = self
                .client
                .get_index_or_image(cancel, &image.reference(true))
                .await?;
            let Some(index) = response.index else {
                continue;
            };
            if let Some(inspector) = inspector.as_mut() {
                inspector(image, &index)?;
            }
            for descriptor in index.manifests() {
                let synthetic =
                    synthetic_image(image, "", &descriptor.digest().to_string());
                manifests.append_with_relation_to(image, synthetic)?;
            }
        }
        manifests.dedup()?;
        let related = self.find_related_tags(cancel, &manifests).await?;
        Ok((manifests, related))
    }
}

/// A discovered image that has no manifest occurrence of its own: it
/// inherits the origin's source so dedup and grouping stay total.
fn synthetic_image(origin: &Image, tag: &str, digest: &str) -> Image {
    let mut image = Image {
        sources: Vec::new(),
        original_name: origin.original_name.clone(),
        original_tag: tag.to_owned(),
        digest: digest.to_owned(),
        new_name: String::new(),
        new_tag: String::new(),
        alias: None,
    };
    let original_ref = image.reference(true);
    image.sources = origin
        .sources
        .first()
        .map(|source| {
            vec![Source {
                original_ref,
                ..source.clone()
            }]
        })
        .unwrap_or_default();
    image
}
