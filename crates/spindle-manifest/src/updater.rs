//! In-place manifest rewriting.
//!
//! Rewrites each matched reference to its pinned
//! `newName:newTag@digest` form at the exact position the scanner
//! recorded, hashes the rewritten bytes, and records one mutation entry
//! per file: (path, post-update digest) → pre-update digest.

use std::path::Path;

use spindle_attest::{Mutations, RegistryKey, Sha256Digest};

use crate::error::ManifestError;
use crate::image::Image;
use crate::list::ImageList;

#[derive(Default)]
pub struct FileUpdater {
    mutations: Mutations,
}

impl FileUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite every manifest that contains at least one image.
    pub fn update(&mut self, images: &ImageList) -> Result<(), ManifestError> {
        for (manifest, group) in images.group_by_manifest() {
            self.update_file(images.dir(), &manifest, group.items())?;
        }
        Ok(())
    }

    fn update_file(
        &mut self,
        dir: &Path,
        manifest: &str,
        images: &[Image],
    ) -> Result<(), ManifestError> {
        if images.is_empty() {
            return Err(ManifestError::NoImages(manifest.to_owned()));
        }
        let path = dir.join(manifest);
        let text = std::fs::read_to_string(&path)?;
        let mut lines: Vec<String> = text.split_inclusive('\n').map(str::to_owned).collect();

        let pre_update_digest = images[0].manifest_digest();

        for image in images {
            let Some(source) = image.sources.first() else {
                continue;
            };
            let new_ref = format!("{}:{}@{}", image.new_name, image.new_tag, image.digest);
            let line = lines
                .get_mut(source.line.saturating_sub(1))
                .ok_or_else(|| ManifestError::Parse {
                    path: manifest.to_owned(),
                    reason: format!("line {} out of range", source.line),
                })?;
            let position =
                line.find(&source.original_ref)
                    .ok_or_else(|| ManifestError::Parse {
                        path: manifest.to_owned(),
                        reason: format!(
                            "reference {:?} not found on line {}",
                            source.original_ref, source.line
                        ),
                    })?;
            line.replace_range(position..position + source.original_ref.len(), &new_ref);
            tracing::debug!(
                manifest,
                line = source.line,
                reference = %new_ref,
                "replaced image reference"
            );
        }

        let updated = lines.concat();
        std::fs::write(&path, &updated)?;

        let key = RegistryKey {
            path: manifest.to_owned(),
            digest: Sha256Digest::of_bytes(updated.as_bytes()),
        };
        if self.mutations.contains_key(&key) {
            return Err(ManifestError::DuplicateMutation {
                path: key.path,
                digest: key.digest.to_string(),
            });
        }
        self.mutations.insert(key, pre_update_digest);
        Ok(())
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn into_mutations(self) -> Mutations {
        self.mutations
    }
}
