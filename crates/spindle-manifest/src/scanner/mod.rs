//! Manifest scanning.
//!
//! Hashes each file and walks its parsed documents for image
//! references. When a provenance attestor is attached, every scanned
//! file is registered with it under (relative path, file digest).

mod filter;

pub use filter::{scan_document_text, ScalarMatch};

use std::path::{Path, PathBuf};

use spindle_attest::{PathCheckerRegistry, Sha256Digest};
use spindle_oci::split_ref;

use crate::error::ManifestError;
use crate::image::{Image, Source};
use crate::list::ImageList;

struct FileTracker {
    manifest: String,
    manifest_digest: Sha256Digest,
    matches: Vec<ScalarMatch>,
}

/// Scans manifest files and accumulates per-file trackers until
/// [`ImageScanner::images`] folds them into an [`ImageList`].
#[derive(Default)]
pub struct ImageScanner {
    directory: PathBuf,
    trackers: Vec<FileTracker>,
}

impl ImageScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `relative_paths` under `dir`, optionally registering each
    /// file with a provenance attestor.
    pub fn scan(
        &mut self,
        dir: &Path,
        relative_paths: &[String],
        mut attestor: Option<&mut PathCheckerRegistry>,
    ) -> Result<(), ManifestError> {
        self.directory = dir.to_path_buf();
        for relative in relative_paths {
            let path = dir.join(relative);
            let data = std::fs::read(&path)?;
            let digest = Sha256Digest::of_bytes(&data);
            let text = String::from_utf8(data).map_err(|e| ManifestError::Parse {
                path: relative.clone(),
                reason: format!("not valid UTF-8: {e}"),
            })?;
            let matches = scan_document_text(&text).map_err(|reason| ManifestError::Parse {
                path: relative.clone(),
                reason,
            })?;
            if let Some(attestor) = attestor.as_deref_mut() {
                attestor.register(relative, digest.clone())?;
            }
            self.trackers.push(FileTracker {
                manifest: relative.clone(),
                manifest_digest: digest,
                matches,
            });
        }
        tracing::debug!(
            dir = %dir.display(),
            files = relative_paths.len(),
            "scanned manifests"
        );
        Ok(())
    }

    /// One image per recorded occurrence; dedup happens later, after
    /// digests are resolved.
    pub fn images(&self) -> ImageList {
        let mut images = ImageList::new(self.directory.clone());
        for tracker in &self.trackers {
            for scalar in &tracker.matches {
                let (name, tag, digest) = split_ref(&scalar.value);
                images.append([Image {
                    sources: vec![Source {
                        manifest: tracker.manifest.clone(),
                        manifest_digest: tracker.manifest_digest.clone(),
                        line: scalar.line,
                        column: scalar.column,
                        node_path: scalar.node_path.clone(),
                        original_ref: scalar.value.clone(),
                    }],
                    original_name: name,
                    original_tag: tag,
                    digest,
                    new_name: String::new(),
                    new_tag: String::new(),
                    alias: None,
                }]);
            }
        }
        images
    }

    /// Drop accumulated trackers ahead of a second pass.
    pub fn reset(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLUX_LIKE: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kustomize-controller
spec:
  template:
    spec:
      containers:
      - name: manager
        image: ghcr.io/fluxcd/kustomize-controller:v0.30.0
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: source-controller
spec:
  template:
    spec:
      containers:
      - name: manager
        image: ghcr.io/fluxcd/source-controller:v0.31.0
";

    fn write_fixture(dir: &Path) -> Vec<String> {
        std::fs::write(dir.join("flux.yaml"), FLUX_LIKE).expect("write flux.yaml");
        std::fs::write(
            dir.join("kustomization.yaml"),
            "resources:\n- flux.yaml\n",
        )
        .expect("write kustomization.yaml");
        vec!["flux.yaml".to_owned(), "kustomization.yaml".to_owned()]
    }

    #[test]
    fn scan_collects_positions_and_digests() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let rel_paths = write_fixture(tmp.path());

        let mut scanner = ImageScanner::new();
        scanner.scan(tmp.path(), &rel_paths, None).expect("scan");

        let images = scanner.images();
        assert_eq!(images.len(), 2);

        let first = &images.items()[0];
        assert_eq!(first.original_name, "ghcr.io/fluxcd/kustomize-controller");
        assert_eq!(first.original_tag, "v0.30.0");
        assert_eq!(first.digest, "");
        assert_eq!(first.sources[0].manifest, "flux.yaml");
        assert_eq!(first.sources[0].line, 10);
        assert_eq!(first.sources[0].column, 16);
        assert_eq!(
            first.sources[0].manifest_digest,
            Sha256Digest::of_bytes(FLUX_LIKE.as_bytes())
        );

        let second = &images.items()[1];
        assert_eq!(second.original_name, "ghcr.io/fluxcd/source-controller");
        assert_eq!(second.sources[0].line, 21);
    }

    #[test]
    fn scan_is_deterministic() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let rel_paths = write_fixture(tmp.path());

        let mut first = ImageScanner::new();
        first.scan(tmp.path(), &rel_paths, None).expect("first scan");
        let mut second = ImageScanner::new();
        second
            .scan(tmp.path(), &rel_paths, None)
            .expect("second scan");

        assert_eq!(first.images().items(), second.images().items());
    }

    #[test]
    fn digest_pinned_references_split() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let manifest = "\
kind: Pod
spec:
  containers:
  - image: gcr.io/tekton-releases/github.com/tektoncd/pipeline/cmd/controller:v0.40.2@sha256:dc7bc7d6607466b502d8dc22ba0598461d7477f608ab68aaff1ff4dedaa04f81
";
        std::fs::write(tmp.path().join("tekton.yaml"), manifest).expect("write");

        let mut scanner = ImageScanner::new();
        scanner
            .scan(tmp.path(), &["tekton.yaml".to_owned()], None)
            .expect("scan");
        let images = scanner.images();
        assert_eq!(images.len(), 1);
        let image = &images.items()[0];
        assert_eq!(
            image.original_name,
            "gcr.io/tekton-releases/github.com/tektoncd/pipeline/cmd/controller"
        );
        assert_eq!(image.original_tag, "v0.40.2");
        assert_eq!(
            image.digest,
            "sha256:dc7bc7d6607466b502d8dc22ba0598461d7477f608ab68aaff1ff4dedaa04f81"
        );
    }

    #[test]
    fn reset_discards_trackers() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let rel_paths = write_fixture(tmp.path());

        let mut scanner = ImageScanner::new();
        scanner.scan(tmp.path(), &rel_paths, None).expect("scan");
        assert_eq!(scanner.images().len(), 2);
        scanner.reset();
        assert_eq!(scanner.images().len(), 0);
    }
}
