//! The ordered image collection.
//!
//! Holds the scanned images, the directory they came from, and a
//! non-owning relation map tying related tags (signatures,
//! attestations, per-platform manifests) back to their origin. The
//! relation map only ever yields reference strings; the full image is
//! recovered by lookup.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::alias::AliasCache;
use crate::error::ManifestError;
use crate::image::{Image, Source};

#[derive(Debug, Default)]
pub struct ImageList {
    items: Vec<Image>,
    dir: PathBuf,
    deduped: bool,
    relation_entries: BTreeMap<String, String>,
}

impl ImageList {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            items: Vec::new(),
            dir: dir.into(),
            deduped: false,
            relation_entries: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn items(&self) -> &[Image] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Image] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Absolute paths of every source manifest.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .map(|image| self.dir.join(image.manifest()))
            .collect()
    }

    pub fn append(&mut self, images: impl IntoIterator<Item = Image>) {
        self.items.extend(images);
    }

    /// Append `image` and record that it belongs to `target`.
    pub fn append_with_relation_to(
        &mut self,
        target: &Image,
        image: Image,
    ) -> Result<(), ManifestError> {
        let key = image.reference(true);
        let value = target.reference(true);
        if let Some(current) = self.relation_entries.get(&key) {
            return Err(ManifestError::DuplicateRelation {
                reference: key,
                current: current.clone(),
                new: value,
            });
        }
        self.relation_entries.insert(key, value);
        self.items.push(image);
        Ok(())
    }

    /// References recorded as related to `reference`, in sorted order.
    pub fn related_to(&self, reference: &str) -> Vec<String> {
        self.relation_entries
            .iter()
            .filter(|(_, target)| target.as_str() == reference)
            .map(|(related, _)| related.clone())
            .collect()
    }

    pub fn get_item_by_ref(&self, reference: &str) -> Option<&Image> {
        self.items
            .iter()
            .find(|image| image.reference(true) == reference)
    }

    pub fn get_item_by_digest(&self, digest: &str) -> Option<&Image> {
        self.items.iter().find(|image| image.digest == digest)
    }

    /// Collect the images related to `reference` into a fresh list.
    pub fn collect_related_to_ref(&self, reference: &str) -> ImageList {
        let mut result = ImageList::new(self.dir.clone());
        for related in self.related_to(reference) {
            if let Some(image) = self.get_item_by_ref(&related) {
                result.append([image.clone()]);
            }
        }
        result
    }

    /// Merge images sharing (original reference, digest), keeping
    /// first-seen order, sorting each merged source list by (manifest,
    /// line, column), and deriving aliases. Guarded so calling twice is
    /// a no-op; images without digests fail [`ManifestError::MissingDigest`].
    pub fn dedup(&mut self) -> Result<(), ManifestError> {
        for image in &self.items {
            if image.digest.is_empty() {
                return Err(ManifestError::MissingDigest(image.reference(true)));
            }
        }
        if !self.deduped {
            let mut order: Vec<(String, String)> = Vec::new();
            let mut merged: HashMap<(String, String), Image> = HashMap::new();
            for image in self.items.drain(..) {
                let key = (image.reference(true), image.digest.clone());
                match merged.get_mut(&key) {
                    Some(existing) => existing.sources.extend(image.sources),
                    None => {
                        order.push(key.clone());
                        merged.insert(key, image);
                    }
                }
            }
            for key in order {
                if let Some(mut image) = merged.remove(&key) {
                    if image.sources.len() > 1 {
                        image.sources.sort_by(compare_sources);
                    }
                    self.items.push(image);
                }
            }
            self.deduped = true;
        }
        self.make_aliases();
        Ok(())
    }

    pub fn make_aliases(&mut self) {
        let aliases = AliasCache::from_images(&self.items).make_aliases_for_names();
        for (image, alias) in self.items.iter_mut().zip(aliases) {
            image.alias = Some(alias);
        }
    }

    /// One single-source image per occurrence, grouped by manifest path.
    pub fn group_by_manifest(&self) -> BTreeMap<String, ImageList> {
        let mut groups: BTreeMap<String, ImageList> = BTreeMap::new();
        for image in &self.items {
            for source in &image.sources {
                let group = groups
                    .entry(source.manifest.clone())
                    .or_insert_with(|| ImageList::new(self.dir.clone()));
                group.append([Image {
                    sources: vec![source.clone()],
                    original_name: image.original_name.clone(),
                    original_tag: image.original_tag.clone(),
                    digest: image.digest.clone(),
                    new_name: image.new_name.clone(),
                    new_tag: image.new_tag.clone(),
                    alias: image.alias.clone(),
                }]);
            }
        }
        groups
    }
}

fn compare_sources(a: &Source, b: &Source) -> std::cmp::Ordering {
    a.manifest
        .cmp(&b.manifest)
        .then_with(|| a.line.cmp(&b.line))
        .then_with(|| a.column.cmp(&b.column))
}
