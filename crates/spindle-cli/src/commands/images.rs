//! The `spindle images` subcommand.
//!
//! Scans and resolves without copying anything, then reports what is
//! known about each image: where it is referenced, its index entries,
//! related tags classified by Cosign suffix, and inline in-toto
//! attestations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use spindle_manifest::{Image, ImageScanner, ManifestLoader, RegistryResolver, Source};
use spindle_oci::Client;

use super::OutputFormat;

const INTOTO_MEDIA_TYPE: &str = "application/vnd.in-toto+json";
const ATTESTATION_MANIFEST_TYPE_ANNOTATION: &str = "vnd.docker.reference.type";
const ATTESTATION_MANIFEST_DIGEST_ANNOTATION: &str = "vnd.docker.reference.digest";

/// Arguments for `spindle images`.
#[derive(Args)]
pub struct ImagesArgs {
    /// Directory containing manifests.
    #[arg(short = 'D', long = "manifest-dir")]
    pub manifest_dir: PathBuf,

    /// Output format.
    #[arg(long = "output-format", value_enum, default_value = "detailed-text")]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct ManifestEntry {
    digest: String,
    #[serde(rename = "mediaType")]
    media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
    size: u64,
}

#[derive(Serialize)]
struct ImageInfo {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(rename = "digestProvided")]
    digest_provided: bool,
    sources: Vec<Source>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    manifests: Vec<ManifestEntry>,
    #[serde(rename = "inlineAttestations", skip_serializing_if = "Vec::is_empty")]
    inline_attestations: Vec<serde_json::Value>,
    #[serde(rename = "externalAttestations", skip_serializing_if = "Vec::is_empty")]
    external_attestations: Vec<String>,
    #[serde(rename = "externalSBOMs", skip_serializing_if = "Vec::is_empty")]
    external_sboms: Vec<String>,
    #[serde(rename = "externalSignatures", skip_serializing_if = "Vec::is_empty")]
    external_signatures: Vec<String>,
    #[serde(rename = "relatedUnclassified", skip_serializing_if = "Vec::is_empty")]
    related_unclassified: Vec<String>,
}

pub async fn execute(args: ImagesArgs, cancel: &CancellationToken) -> Result<()> {
    let mut loader = ManifestLoader::new(&args.manifest_dir);
    loader.load()?;
    let (scratch, rel_paths) = loader.rel_paths();

    let mut scanner = ImageScanner::new();
    scanner.scan(&scratch, &rel_paths, None)?;
    let mut images = scanner.images();

    let digest_provided: Vec<String> = images
        .items()
        .iter()
        .filter(|image| !image.digest.is_empty())
        .map(|image| image.reference(true))
        .collect();

    let client = Client::new();
    let resolver = RegistryResolver::new(&client);

    tracing::info!("resolving image digests");
    resolver.resolve_digests(cancel, &mut images).await?;
    images.dedup()?;

    tracing::info!("resolving related images");
    let related = resolver.find_related_tags(cancel, &images).await?;

    let mut index_entries: BTreeMap<String, Vec<ManifestEntry>> = BTreeMap::new();
    let mut attestation_manifests: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut inspector = |image: &Image, index: &oci_spec::image::ImageIndex| {
        let reference = image.reference(true);
        let mut entries = Vec::new();
        for descriptor in index.manifests() {
            entries.push(ManifestEntry {
                digest: descriptor.digest().to_string(),
                media_type: descriptor.media_type().to_string(),
                platform: descriptor
                    .platform()
                    .as_ref()
                    .map(|p| format!("{}/{}", p.os(), p.architecture())),
                size: descriptor.size() as u64,
            });
            if let Some(annotations) = descriptor.annotations() {
                if annotations.get(ATTESTATION_MANIFEST_TYPE_ANNOTATION).map(String::as_str)
                    == Some("attestation-manifest")
                {
                    if annotations.get(ATTESTATION_MANIFEST_DIGEST_ANNOTATION).is_some() {
                        attestation_manifests
                            .entry(reference.clone())
                            .or_default()
                            .push(format!(
                                "{}@{}",
                                image.original_name,
                                descriptor.digest()
                            ));
                    }
                }
            }
        }
        index_entries.insert(reference, entries);
        Ok(())
    };
    let (manifests, related_to_manifests) = resolver
        .find_related_from_indices(cancel, &images, Some(&mut inspector))
        .await?;

    let mut output = Vec::new();
    for image in images.items() {
        let reference = image.reference(true);

        let mut inline_attestations = Vec::new();
        for attestation_ref in attestation_manifests.get(&reference).into_iter().flatten() {
            for artefact in client
                .fetch(cancel, attestation_ref, &[INTOTO_MEDIA_TYPE])
                .await?
            {
                inline_attestations.push(serde_json::from_slice(&artefact.data)?);
            }
        }

        let mut external_attestations = Vec::new();
        let mut external_sboms = Vec::new();
        let mut external_signatures = Vec::new();
        let mut related_unclassified = Vec::new();
        let mut related_refs = related.related_to(&reference);
        for manifest_ref in manifests.related_to(&reference) {
            related_refs.extend(related_to_manifests.related_to(&manifest_ref));
        }
        for related_ref in related_refs {
            if related_ref.contains(".att@") {
                external_attestations.push(related_ref);
            } else if related_ref.contains(".sbom@") {
                external_sboms.push(related_ref);
            } else if related_ref.contains(".sig@") {
                external_signatures.push(related_ref);
            } else {
                related_unclassified.push(related_ref);
            }
        }

        output.push(ImageInfo {
            reference: reference.clone(),
            alias: image.alias.clone(),
            digest_provided: digest_provided.contains(&reference),
            sources: image.sources.clone(),
            manifests: index_entries.remove(&reference).unwrap_or_default(),
            inline_attestations,
            external_attestations,
            external_sboms,
            external_signatures,
            related_unclassified,
        });
    }

    print_info(&output, args.output_format)?;
    loader.cleanup()?;
    Ok(())
}

fn print_info(output: &[ImageInfo], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::DirectJson => {
            for info in output {
                println!("{}", serde_json::to_string_pretty(info)?);
            }
        }
        OutputFormat::Text | OutputFormat::DetailedText => {
            for info in output {
                println!("{}", info.reference);
                if let Some(alias) = &info.alias {
                    println!("  Alias: {alias}");
                }
                println!("  Sources:");
                for source in &info.sources {
                    println!(
                        "    {} {}:{}:{}@sha256:{}",
                        source.original_ref,
                        source.manifest,
                        source.line,
                        source.column,
                        source.manifest_digest
                    );
                }
                println!("  Digest provided: {}", info.digest_provided);
                if !info.manifests.is_empty() {
                    println!("  OCI manifests:");
                    for entry in &info.manifests {
                        println!(
                            "    {}  {}  {}  {}",
                            entry.digest,
                            entry.media_type,
                            entry.platform.as_deref().unwrap_or("-"),
                            entry.size
                        );
                    }
                }
                if format == OutputFormat::Text {
                    println!(
                        "  Inline attestations: {}",
                        info.inline_attestations.len()
                    );
                    println!(
                        "  External attestations: {}",
                        info.external_attestations.len()
                    );
                    println!("  External SBOMs: {}", info.external_sboms.len());
                    println!(
                        "  External signatures: {}",
                        info.external_signatures.len()
                    );
                    continue;
                }
                print_refs("External attestations", &info.external_attestations);
                print_refs("External SBOMs", &info.external_sboms);
                print_refs("External signatures", &info.external_signatures);
                print_refs("Related unclassified", &info.related_unclassified);
                if info.inline_attestations.is_empty() {
                    println!("  Inline attestations: <none>");
                } else {
                    println!("  Inline attestations:");
                    for statement in &info.inline_attestations {
                        println!("    {}", serde_json::to_string(statement)?);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_refs(label: &str, references: &[String]) {
    if references.is_empty() {
        println!("  {label}: <none>");
        return;
    }
    println!("  {label}:");
    for reference in references {
        println!("    {reference}");
    }
}
