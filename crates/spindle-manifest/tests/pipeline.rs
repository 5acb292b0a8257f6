//! Offline pipeline tests: scan → attest → update → package, with the
//! registry-facing stages replaced by locally injected digests.

use std::path::Path;
use std::process::Command;

use spindle_attest::{detect_vcs, Sha256Digest};
use spindle_manifest::attestation::{
    original_image_ref_statements, replaced_image_ref_statements,
    resolved_image_ref_statements,
};
use spindle_manifest::copier::set_new_image_refs;
use spindle_manifest::{FileUpdater, ImageList, ImageScanner, ManifestLoader};
use spindle_oci::artefact::prepare_artefact;

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

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git invocation failed");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write_fixture_repo(dir: &Path) {
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    let manifests = dir.join("manifests");
    std::fs::create_dir_all(&manifests).expect("mkdir");
    std::fs::write(manifests.join("flux.yaml"), FLUX_LIKE).expect("write flux.yaml");
    std::fs::write(
        manifests.join("kustomization.yaml"),
        "resources:\n- flux.yaml\n",
    )
    .expect("write kustomization.yaml");
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "add manifests"]);
}

fn resolve_offline(images: &mut ImageList) {
    let known = [
        (
            "ghcr.io/fluxcd/kustomize-controller:v0.30.0",
            "sha256:8c6952141b93bde7e9e224f0b25b1d2f8f2bf4a92d9b03f55c648dcdc658b0d2",
        ),
        (
            "ghcr.io/fluxcd/source-controller:v0.31.0",
            "sha256:1e0b062d5129a462250eb03c5e8bd09b4cc42e88b25e39e35eee81d7ed2d15c0",
        ),
    ];
    for image in images.items_mut() {
        let reference = image.reference(true);
        let digest = known
            .iter()
            .find(|(known_ref, _)| *known_ref == reference)
            .map(|(_, digest)| (*digest).to_owned())
            .unwrap_or_else(|| panic!("no digest fixture for {reference}"));
        image.digest = digest;
    }
}

#[test]
fn statement_stream_is_reproducible() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_fixture_repo(tmp.path());
    let manifest_dir = tmp.path().join("manifests");

    let mut checksums = Vec::new();
    for _ in 0..3 {
        let mut loader = ManifestLoader::new(&manifest_dir);
        loader.load().expect("load");
        let (scratch, rel_paths) = loader.rel_paths();
        assert_eq!(rel_paths.len(), 2);
        assert!(loader.contains_rel_path("flux.yaml"));

        let mut registry = detect_vcs(&manifest_dir)
            .expect("detection should not fail")
            .expect("fixture is a git repo");

        let mut scanner = ImageScanner::new();
        scanner
            .scan(&scratch, &rel_paths, Some(&mut registry))
            .expect("scan");

        let collection = registry.make_summary_collection().expect("collection");
        assert_eq!(collection.providers, vec!["git"]);
        assert_eq!(collection.entry_groups.len(), 1);
        assert_eq!(collection.entry_groups[0].len(), rel_paths.len() + 1);

        registry.associate_core_statements().expect("core");

        let mut images = scanner.images();
        registry
            .associate_statements(original_image_ref_statements(&images))
            .expect("original statements");

        resolve_offline(&mut images);
        images.dedup().expect("dedup");
        registry
            .associate_statements(resolved_image_ref_statements(&images))
            .expect("resolved statements");

        let mut buffer = Vec::new();
        registry.encode_all(&mut buffer).expect("encode");
        checksums.push(Sha256Digest::of_bytes(&buffer).to_string());
    }
    assert_eq!(checksums[0], checksums[1]);
    assert_eq!(checksums[1], checksums[2]);
}

#[test]
fn expected_aliases_for_flux_fixture() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_fixture_repo(tmp.path());

    let mut loader = ManifestLoader::new(tmp.path().join("manifests"));
    loader.load().expect("load");
    let (scratch, rel_paths) = loader.rel_paths();

    let mut scanner = ImageScanner::new();
    scanner.scan(&scratch, &rel_paths, None).expect("scan");
    let mut images = scanner.images();
    resolve_offline(&mut images);
    images.dedup().expect("dedup");

    let aliases: Vec<&str> = images
        .items()
        .iter()
        .filter_map(|image| image.alias.as_deref())
        .collect();
    assert_eq!(aliases, vec!["kustomize-controller", "source-controller"]);

    let first = &images.items()[0];
    assert_eq!(first.sources[0].line, 10);
    assert_eq!(first.sources[0].column, 16);
}

#[test]
fn package_twice_yields_identical_references() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_fixture_repo(tmp.path());

    let mut loader = ManifestLoader::new(tmp.path().join("manifests"));
    loader.load().expect("load");
    let (scratch, rel_paths) = loader.rel_paths();

    let mut scanner = ImageScanner::new();
    scanner.scan(&scratch, &rel_paths, None).expect("scan");
    let mut images = scanner.images();
    resolve_offline(&mut images);
    images.dedup().expect("dedup");
    set_new_image_refs("example.test/out", images.items_mut());
    FileUpdater::new().update(&images).expect("update");

    scanner.reset();
    scanner.scan(&scratch, &rel_paths, None).expect("second scan");
    let mut replaced = scanner.images();
    resolve_offline_replaced(&mut replaced);
    replaced.dedup().expect("dedup replaced");
    let statements = replaced_image_ref_statements(&replaced);

    let (_, source_epoch) = loader.most_recently_modified().expect("source epoch");

    let first = prepare_artefact(&scratch, Some(source_epoch), &statements)
        .expect("first package");
    let second = prepare_artefact(&scratch, Some(source_epoch), &statements)
        .expect("second package");

    let first_ref = format!("example.test/out:{}@{}", first.alias_tag, first.index_digest);
    let second_ref = format!(
        "example.test/out:{}@{}",
        second.alias_tag, second.index_digest
    );
    assert_eq!(first_ref, second_ref);
}

fn resolve_offline_replaced(images: &mut ImageList) {
    // replaced references are already digest-pinned by the updater
    for image in images.items() {
        assert!(image.original_name.starts_with("example.test/out"));
        assert!(image.original_tag.starts_with("app."));
        assert!(!image.digest.is_empty());
    }
}

#[test]
fn scan_update_scan_round_trip() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_fixture_repo(tmp.path());

    let mut loader = ManifestLoader::new(tmp.path().join("manifests"));
    loader.load().expect("load");
    let (scratch, rel_paths) = loader.rel_paths();

    let mut scanner = ImageScanner::new();
    scanner.scan(&scratch, &rel_paths, None).expect("scan");
    let mut images = scanner.images();
    let pre_update_digest = images.items()[0].manifest_digest();
    resolve_offline(&mut images);
    images.dedup().expect("dedup");
    set_new_image_refs("example.test/out", images.items_mut());

    let mut updater = FileUpdater::new();
    updater.update(&images).expect("update");
    let mutations = updater.into_mutations();
    assert_eq!(mutations.len(), 1);
    for (key, old_digest) in &mutations {
        assert_eq!(key.path, "flux.yaml");
        assert_eq!(*old_digest, pre_update_digest);
        assert_ne!(key.digest, pre_update_digest);
    }

    scanner.reset();
    scanner.scan(&scratch, &rel_paths, None).expect("second scan");
    let replaced = scanner.images();
    assert_eq!(replaced.len(), images.len());
    for (replaced, original) in replaced.items().iter().zip(images.items()) {
        assert_eq!(replaced.original_name, original.new_name);
        assert_eq!(replaced.original_tag, original.new_tag);
        assert_eq!(replaced.digest, original.digest);
    }
}
