//! The `spindle view` subcommand.
//!
//! Prints an artefact's index and image manifests, the app images
//! recorded by `ReplacedImageRef` statements, and the decoded
//! attestations summary.

use std::io::{BufRead, BufReader};

use clap::Args;
use color_eyre::eyre::Result;
use flate2::read::GzDecoder;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use spindle_attest::predicates::REPLACED_IMAGE_REF_PREDICATE_TYPE;
use spindle_attest::statement::SummaryAnnotation;
use spindle_oci::artefact::{
    ArtefactManifest, ATTESTATIONS_SUMMARY_ANNOTATION,
};
use spindle_oci::{Client, Reference, ATTEST_MEDIA_TYPE, CONFIG_MEDIA_TYPE, CONTENT_MEDIA_TYPE};

use super::OutputFormat;

/// Arguments for `spindle view`.
#[derive(Args)]
pub struct ViewArgs {
    /// Name of the artefact image to inspect.
    #[arg(short = 'I', long = "image")]
    pub image: String,

    /// Output format.
    #[arg(long = "output-format", value_enum, default_value = "detailed-text")]
    pub output_format: OutputFormat,
}

#[derive(Default, Serialize)]
struct RawManifestInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<serde_json::Value>,
}

#[derive(Default, Serialize)]
struct ArtefactView {
    #[serde(rename = "appImages", skip_serializing_if = "Vec::is_empty")]
    app_images: Vec<String>,
    index: RawManifestInfo,
    content: RawManifestInfo,
    attest: RawManifestInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attestations: Vec<serde_json::Value>,
    #[serde(rename = "attestationsSummary", skip_serializing_if = "Option::is_none")]
    attestations_summary: Option<SummaryAnnotation>,
}

pub async fn execute(args: ViewArgs, cancel: &CancellationToken) -> Result<()> {
    let client = Client::new();
    let mut view = ArtefactView::default();

    let response = client.get_index_or_image(cancel, &args.image).await?;
    let Some(index) = &response.index else {
        return Err(color_eyre::eyre::eyre!(
            "no index manifest found for {:?}",
            args.image
        ));
    };
    view.index = RawManifestInfo {
        digest: response.digest.clone(),
        manifest: Some(serde_json::from_slice(&response.raw)?),
    };

    let parsed = Reference::parse(&args.image)?;
    for descriptor in index.manifests() {
        let manifest_ref = format!(
            "{}/{}@{}",
            parsed.registry,
            parsed.repository,
            descriptor.digest()
        );
        let manifest_response = client.get_index_or_image(cancel, &manifest_ref).await?;
        let manifest: ArtefactManifest = serde_json::from_slice(&manifest_response.raw)?;
        let info = RawManifestInfo {
            digest: manifest_response.digest.clone(),
            manifest: Some(serde_json::from_slice(&manifest_response.raw)?),
        };
        if manifest.config.media_type == CONFIG_MEDIA_TYPE {
            match manifest.layers.first().map(|l| l.media_type.as_str()) {
                Some(CONTENT_MEDIA_TYPE) => view.content = info,
                Some(ATTEST_MEDIA_TYPE) => view.attest = info,
                _ => {}
            }
        }
        if let Some(annotations) = descriptor.annotations() {
            if let Some(summary) = annotations.get(ATTESTATIONS_SUMMARY_ANNOTATION) {
                view.attestations_summary = Some(SummaryAnnotation::unmarshal(summary)?);
            }
        }
    }

    for artefact in client.fetch(cancel, &args.image, &[ATTEST_MEDIA_TYPE]).await? {
        let reader = BufReader::new(GzDecoder::new(artefact.reader()));
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let statement: serde_json::Value = serde_json::from_str(&line)?;
            if statement["predicateType"] == REPLACED_IMAGE_REF_PREDICATE_TYPE {
                if let Some(reference) = statement["predicate"]["replacedImageReference"]
                    ["reference"]
                    .as_str()
                {
                    view.app_images.push(reference.to_owned());
                }
            }
            view.attestations.push(statement);
        }
    }

    print_view(&args.image, &view, args.output_format)
}

fn print_view(image: &str, view: &ArtefactView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::DirectJson => {
            println!("{}", serde_json::to_string_pretty(view)?);
        }
        OutputFormat::Text | OutputFormat::DetailedText => {
            println!("{image}");
            println!("  Digest: {}", view.index.digest);
            println!("  OCI manifests:");
            if !view.content.digest.is_empty() {
                println!("    {} {}", view.content.digest, CONTENT_MEDIA_TYPE);
            }
            if !view.attest.digest.is_empty() {
                println!("    {} {}", view.attest.digest, ATTEST_MEDIA_TYPE);
            }
            if !view.app_images.is_empty() {
                println!("  App images:");
                for reference in &view.app_images {
                    println!("    {reference}");
                }
            }
            if let Some(summary) = &view.attestations_summary {
                println!("  Attestations summary:");
                println!("    Number of statements: {}", summary.num_statements);
                if summary.num_statements > 0 {
                    println!("    Predicate types:");
                    for predicate_type in &summary.predicate_types {
                        println!("      {predicate_type}");
                    }
                    println!("    Subjects:");
                    for subject in &summary.subjects {
                        println!("      {}@sha256:{}", subject.name, subject.digest);
                    }
                }
            }
            if format == OutputFormat::DetailedText && !view.attestations.is_empty() {
                println!("  Attestations:");
                for statement in &view.attestations {
                    println!("    {}", serde_json::to_string(statement)?);
                }
            }
        }
    }
    Ok(())
}
