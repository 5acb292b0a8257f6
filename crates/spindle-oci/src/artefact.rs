//! The spindle artefact codec.
//!
//! An artefact is an OCI image index with one content image (a gzipped
//! tarball of the manifest directory) and, when statements exist, one
//! attestations image (gzipped newline-delimited in-toto JSON). Index
//! bytes are content-addressed: the primary tag is derived from the
//! SHA-256 of the gzipped tarball and the index digest from its own
//! canonical bytes, so identical inputs produce identical references.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use spindle_attest::statement::{encode_statements, SummaryAnnotation};
use spindle_attest::Statement;

use crate::client::{cancellable, Client, OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE};
use crate::error::OciError;
use crate::reference::Reference;

/// Config blob media type for both artefact images.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.tape.config.v1alpha1+json";
/// Content layer media type (gzipped manifest tarball).
pub const CONTENT_MEDIA_TYPE: &str = "application/vnd.docker.tape.content.v1alpha1.tar+gzip";
/// Attestations layer media type (gzipped JSONL statements).
pub const ATTEST_MEDIA_TYPE: &str = "application/vnd.docker.tape.attest.v1alpha1.jsonl+gzip";

pub const CONTENT_INTERPRETER_ANNOTATION: &str = "docker.com/tape/content-interpreter.v1alpha1";
pub const CONTENT_INTERPRETER_KUBECTL_APPLY: &str =
    "docker.com/tape/kubectl-apply.v1alpha1.tar+gzip";
pub const ATTESTATIONS_SUMMARY_ANNOTATION: &str =
    "docker.com/tape/attestations-summary.v1alpha1";
pub const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

/// Tag prefix for copied application images.
pub const APP_IMAGE_TAG_PREFIX: &str = "app.";
/// Tag prefix for the artefact index itself.
pub const CONFIG_IMAGE_TAG_PREFIX: &str = "config.";

/// Descriptor in artefact manifests and indices. Field order is part of
/// the canonical byte encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtefactDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<ArtefactPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtefactPlatform {
    pub architecture: String,
    pub os: String,
}

impl ArtefactPlatform {
    fn unknown() -> Self {
        Self {
            architecture: "unknown".to_owned(),
            os: "unknown".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtefactManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: ArtefactDescriptor,
    pub layers: Vec<ArtefactDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtefactIndex {
    pub schema_version: u32,
    pub media_type: String,
    pub manifests: Vec<ArtefactDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A fetched artefact layer: the compressed bytes plus the metadata of
/// the descriptors leading to it.
pub struct ArtefactInfo {
    pub media_type: String,
    pub digest: String,
    pub annotations: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

impl ArtefactInfo {
    /// Reader over the raw (still compressed) layer bytes.
    pub fn reader(&self) -> impl Read + '_ {
        std::io::Cursor::new(&self.data)
    }
}

/// Build the deterministic content tarball: regular files and
/// directories only, forward-slash paths relative to `source_dir`,
/// owner/timestamps cleared, entries in ascending path order.
pub fn build_artefact(source_dir: &Path, output: impl Write) -> Result<(), OciError> {
    let gz = GzEncoder::new(output, Compression::default());
    let mut tar = tar::Builder::new(gz);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            OciError::Io(std::io::Error::other(format!(
                "failed to walk {}: {e}",
                source_dir.display()
            )))
        })?;
        let file_type = entry.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            // symlinks and special files are skipped
            continue;
        }
        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            tar.append_data(&mut header, format!("{name}/"), std::io::empty())?;
        } else {
            let metadata = entry.metadata().map_err(|e| {
                OciError::Io(std::io::Error::other(format!(
                    "failed to stat {}: {e}",
                    entry.path().display()
                )))
            })?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(metadata.len());
            let file = std::fs::File::open(entry.path())?;
            tar.append_data(&mut header, name, file)?;
        }
    }

    let gz = tar.into_inner()?;
    gz.finish()?;
    Ok(())
}

/// Encode statements as gzipped newline-delimited in-toto JSON. Returns
/// `None` when there is nothing to attest.
pub fn build_attest_layer(statements: &[Statement]) -> Result<Option<Vec<u8>>, OciError> {
    if statements.is_empty() {
        return Ok(None);
    }
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    encode_statements(statements, &mut gz)?;
    Ok(Some(gz.finish()?))
}

/// Everything needed to push (or inspect) an artefact, assembled
/// deterministically and entirely offline.
pub struct PreparedArtefact {
    pub primary_tag: String,
    pub alias_tag: String,
    pub index_digest: String,
    pub index_bytes: Vec<u8>,
    /// (digest, media type, bytes) for each manifest, push order.
    pub manifests: Vec<(String, String, Vec<u8>)>,
    /// (digest, bytes) for each blob, push order.
    pub blobs: Vec<(String, Vec<u8>)>,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn blob_descriptor(media_type: &str, data: &[u8]) -> ArtefactDescriptor {
    ArtefactDescriptor {
        media_type: media_type.to_owned(),
        digest: format!("sha256:{}", sha256_hex(data)),
        size: data.len() as u64,
        platform: None,
        annotations: None,
    }
}

/// Assemble the two-layer artefact for `source_dir`.
///
/// The `created` annotation uses the source-epoch timestamp when one is
/// known, falling back to the current UTC time (which forfeits
/// reproducibility, as the caller chose).
pub fn prepare_artefact(
    source_dir: &Path,
    timestamp: Option<DateTime<Utc>>,
    statements: &[Statement],
) -> Result<PreparedArtefact, OciError> {
    let mut content_layer = Vec::new();
    build_artefact(source_dir, &mut content_layer)?;
    let content_hex = sha256_hex(&content_layer);

    let created = timestamp
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let index_annotations = BTreeMap::from([(CREATED_ANNOTATION.to_owned(), created)]);

    let config_blob = b"{}".to_vec();
    let config_descriptor = blob_descriptor(CONFIG_MEDIA_TYPE, &config_blob);

    let mut blobs = vec![
        (config_descriptor.digest.clone(), config_blob),
        (format!("sha256:{content_hex}"), content_layer),
    ];
    let content_layer_size = blobs[1].1.len() as u64;

    let mut content_annotations = index_annotations.clone();
    content_annotations.insert(
        CONTENT_INTERPRETER_ANNOTATION.to_owned(),
        CONTENT_INTERPRETER_KUBECTL_APPLY.to_owned(),
    );
    let content_manifest = ArtefactManifest {
        schema_version: 2,
        media_type: OCI_MANIFEST_MEDIA_TYPE.to_owned(),
        config: config_descriptor.clone(),
        layers: vec![ArtefactDescriptor {
            media_type: CONTENT_MEDIA_TYPE.to_owned(),
            digest: format!("sha256:{content_hex}"),
            size: content_layer_size,
            platform: None,
            annotations: None,
        }],
        annotations: content_annotations,
    };
    let content_manifest_bytes = serde_json::to_vec(&content_manifest)?;

    let mut manifests = vec![(
        format!("sha256:{}", sha256_hex(&content_manifest_bytes)),
        OCI_MANIFEST_MEDIA_TYPE.to_owned(),
        content_manifest_bytes,
    )];

    let mut index_entries = vec![ArtefactDescriptor {
        media_type: OCI_MANIFEST_MEDIA_TYPE.to_owned(),
        digest: manifests[0].0.clone(),
        size: manifests[0].2.len() as u64,
        platform: Some(ArtefactPlatform::unknown()),
        annotations: None,
    }];

    if let Some(attest_layer) = build_attest_layer(statements)? {
        let attest_layer_descriptor = blob_descriptor(ATTEST_MEDIA_TYPE, &attest_layer);
        blobs.push((attest_layer_descriptor.digest.clone(), attest_layer));

        let attest_manifest = ArtefactManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_owned(),
            config: config_descriptor,
            layers: vec![attest_layer_descriptor],
            annotations: index_annotations.clone(),
        };
        let attest_manifest_bytes = serde_json::to_vec(&attest_manifest)?;
        let attest_manifest_digest =
            format!("sha256:{}", sha256_hex(&attest_manifest_bytes));

        let summary = SummaryAnnotation::from_statements(statements).marshal()?;
        index_entries.push(ArtefactDescriptor {
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_owned(),
            digest: attest_manifest_digest.clone(),
            size: attest_manifest_bytes.len() as u64,
            platform: Some(ArtefactPlatform::unknown()),
            annotations: Some(BTreeMap::from([(
                ATTESTATIONS_SUMMARY_ANNOTATION.to_owned(),
                summary,
            )])),
        });
        manifests.push((
            attest_manifest_digest,
            OCI_MANIFEST_MEDIA_TYPE.to_owned(),
            attest_manifest_bytes,
        ));
    }

    let index = ArtefactIndex {
        schema_version: 2,
        media_type: OCI_INDEX_MEDIA_TYPE.to_owned(),
        manifests: index_entries,
        annotations: index_annotations,
    };
    let index_bytes = serde_json::to_vec(&index)?;
    let index_digest = format!("sha256:{}", sha256_hex(&index_bytes));

    Ok(PreparedArtefact {
        primary_tag: format!("{CONFIG_IMAGE_TAG_PREFIX}{content_hex}"),
        alias_tag: format!("{CONFIG_IMAGE_TAG_PREFIX}{}", &content_hex[..7]),
        index_digest,
        index_bytes,
        manifests,
        blobs,
    })
}

impl Client {
    /// Build the artefact for `source_dir` and push it to
    /// `destination`, returning `<destination>:<alias-tag>@<digest>`.
    pub async fn push_artefact(
        &self,
        cancel: &CancellationToken,
        destination: &str,
        source_dir: &Path,
        timestamp: Option<DateTime<Utc>>,
        statements: &[Statement],
    ) -> Result<String, OciError> {
        let prepared = prepare_artefact(source_dir, timestamp, statements)?;
        let reference = Reference::parse(destination)?;

        for (digest, data) in &prepared.blobs {
            self.push_blob(cancel, &reference, digest, data.clone())
                .await?;
        }
        for (digest, media_type, bytes) in &prepared.manifests {
            self.put_manifest(cancel, &reference, digest, media_type, bytes)
                .await?;
        }
        self.put_manifest(
            cancel,
            &reference,
            &prepared.primary_tag,
            OCI_INDEX_MEDIA_TYPE,
            &prepared.index_bytes,
        )
        .await?;
        self.put_manifest(
            cancel,
            &reference,
            &prepared.alias_tag,
            OCI_INDEX_MEDIA_TYPE,
            &prepared.index_bytes,
        )
        .await?;

        tracing::info!(
            destination,
            tag = %prepared.primary_tag,
            digest = %prepared.index_digest,
            "pushed artefact index"
        );
        Ok(format!(
            "{destination}:{}@{}",
            prepared.alias_tag, prepared.index_digest
        ))
    }

    /// Walk the referenced image (or every image in the referenced
    /// index) and return the layers whose media type is in the filter;
    /// an empty filter means all layers. Layer bytes stay compressed.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        media_types: &[&str],
    ) -> Result<Vec<ArtefactInfo>, OciError> {
        let parsed = Reference::parse(reference)?;
        let response = self.get_index_or_image(cancel, reference).await?;

        let mut images: Vec<(Vec<u8>, BTreeMap<String, String>)> = Vec::new();
        if let Some(index) = &response.index {
            for descriptor in index.manifests() {
                let descriptor_annotations = descriptor
                    .annotations()
                    .clone()
                    .map(|a| a.into_iter().collect())
                    .unwrap_or_default();
                let manifest_ref = format!(
                    "{}/{}@{}",
                    parsed.registry,
                    parsed.repository,
                    descriptor.digest()
                );
                let manifest = self.get_index_or_image(cancel, &manifest_ref).await?;
                images.push((manifest.raw, descriptor_annotations));
            }
        } else {
            images.push((response.raw, BTreeMap::new()));
        }

        let mut artefacts = Vec::new();
        for (raw, descriptor_annotations) in images {
            let manifest: ArtefactManifest = serde_json::from_slice(&raw)?;
            for layer in &manifest.layers {
                if !media_types.is_empty()
                    && !media_types.contains(&layer.media_type.as_str())
                {
                    continue;
                }
                let data = self.get_blob(cancel, &parsed, &layer.digest).await?;
                let mut annotations = descriptor_annotations.clone();
                annotations.extend(manifest.annotations.clone());
                if let Some(layer_annotations) = &layer.annotations {
                    annotations.extend(layer_annotations.clone());
                }
                artefacts.push(ArtefactInfo {
                    media_type: layer.media_type.clone(),
                    digest: layer.digest.clone(),
                    annotations,
                    data,
                });
            }
        }
        Ok(artefacts)
    }

    /// Fetch the single layer of an image, failing on zero or many.
    pub async fn get_single_artefact(
        &self,
        cancel: &CancellationToken,
        reference: &str,
    ) -> Result<ArtefactInfo, OciError> {
        let artefacts = self.fetch(cancel, reference, &[]).await?;
        match artefacts.len() {
            0 => Err(OciError::NoLayers(reference.to_owned())),
            1 => Ok(artefacts.into_iter().next().ok_or_else(|| {
                OciError::NoLayers(reference.to_owned())
            })?),
            _ => Err(OciError::MultipleLayers(reference.to_owned())),
        }
    }

    /// Extract an artefact's content layer into `output_dir`.
    pub async fn pull_artefact(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        output_dir: &Path,
    ) -> Result<(), OciError> {
        let artefacts = self
            .fetch(cancel, reference, &[CONTENT_MEDIA_TYPE])
            .await?;
        let Some(content) = artefacts.first() else {
            return Err(OciError::NoLayers(reference.to_owned()));
        };
        cancellable(cancel, async {
            let mut archive = tar::Archive::new(GzDecoder::new(content.reader()));
            std::fs::create_dir_all(output_dir)?;
            archive.unpack(output_dir)?;
            Ok::<(), OciError>(())
        })
        .await??;
        Ok(())
    }
}
