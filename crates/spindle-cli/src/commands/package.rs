//! The `spindle package` subcommand: the full pipeline.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use tokio_util::sync::CancellationToken;

use spindle_manifest::attestation::{
    original_image_ref_statements, replaced_image_ref_statements,
    resolved_image_ref_statements,
};
use spindle_manifest::{
    FileUpdater, ImageScanner, ManifestLoader, Packager, RegistryCopier, RegistryResolver,
};
use spindle_oci::{validate_output_image, Client};

/// Arguments for `spindle package`.
#[derive(Args)]
pub struct PackageArgs {
    /// Directory containing manifests.
    #[arg(short = 'D', long = "manifest-dir")]
    pub manifest_dir: PathBuf,

    /// Name of the image to push; a bare repository, no tag or digest.
    #[arg(short = 'O', long = "output-image")]
    pub output_image: String,
}

pub async fn execute(args: PackageArgs, cancel: &CancellationToken) -> Result<()> {
    validate_output_image(&args.output_image)?;

    let mut loader = ManifestLoader::new(&args.manifest_dir);
    loader.load()?;
    let (scratch, rel_paths) = loader.rel_paths();
    tracing::debug!(files = rel_paths.len(), "loaded manifests");

    let mut registry = spindle_attest::detect_vcs(&args.manifest_dir)?;
    match registry.as_ref().and_then(|r| r.base_dir_summary()) {
        Some(summary) => {
            tracing::info!(
                dir = %args.manifest_dir.display(),
                vcs = serde_json::to_string(summary)?,
                "VCS info"
            );
        }
        None => {
            tracing::warn!(
                dir = %args.manifest_dir.display(),
                "path is not under version control, packaging without provenance"
            );
        }
    }

    let mut scanner = ImageScanner::new();
    scanner.scan(&scratch, &rel_paths, registry.as_mut())?;
    let mut images = scanner.images();
    tracing::debug!(images = images.len(), "found image references");

    if let Some(registry) = registry.as_mut() {
        registry.associate_core_statements()?;
        registry.associate_statements(original_image_ref_statements(&images))?;
    }

    let client = Client::new();
    let resolver = RegistryResolver::new(&client);

    tracing::info!("resolving image digests");
    resolver.resolve_digests(cancel, &mut images).await?;
    images.dedup()?;

    if let Some(registry) = registry.as_mut() {
        registry.associate_statements(resolved_image_ref_statements(&images))?;
    }

    tracing::info!("resolving related images");
    let mut related = resolver.find_related_tags(cancel, &images).await?;
    let (_, mut related_to_manifests) = resolver
        .find_related_from_indices(cancel, &images, None)
        .await?;

    tracing::info!("copying images");
    let copier = RegistryCopier::new(&client, &args.output_image);
    let copied = copier
        .copy_images(
            cancel,
            vec![&mut images, &mut related, &mut related_to_manifests],
        )
        .await?;
    tracing::info!(images = copied.len(), "copied images");

    tracing::info!("updating manifest files");
    let mut updater = FileUpdater::new();
    updater.update(&images)?;
    if let Some(registry) = registry.as_mut() {
        registry.register_mutated(updater.into_mutations());
    }

    scanner.reset();
    scanner.scan(&scratch, &rel_paths, None)?;
    let mut replaced_images = scanner.images();
    replaced_images.dedup()?;
    if let Some(registry) = registry.as_mut() {
        registry.associate_statements(replaced_image_ref_statements(&replaced_images))?;
    }

    let source_epoch = loader.most_recently_modified();
    if let Some((path, timestamp)) = &source_epoch {
        tracing::debug!(
            path = %path.display(),
            timestamp = %timestamp,
            "using source epoch from most recently modified manifest"
        );
    }

    let statements = match registry.as_mut() {
        Some(registry) => registry.get_statements().to_vec(),
        None => Vec::new(),
    };

    let packager = Packager::new(&client, &args.output_image);
    let reference = packager
        .push(
            cancel,
            &scratch,
            source_epoch.map(|(_, timestamp)| timestamp),
            &statements,
        )
        .await?;

    tracing::info!(reference = %reference, "created package");
    println!("{reference}");

    loader.cleanup()?;
    Ok(())
}
