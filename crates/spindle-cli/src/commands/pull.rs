//! The `spindle pull` subcommand.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::Result;
use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;

use spindle_oci::{Client, ATTEST_MEDIA_TYPE, CONTENT_MEDIA_TYPE};

/// Arguments for `spindle pull`.
#[derive(Args)]
pub struct PullArgs {
    /// Directory to extract the manifests into.
    #[arg(short = 'D', long = "manifest-dir")]
    pub manifest_dir: PathBuf,

    /// Name of the artefact image to pull.
    #[arg(short = 'I', long = "image")]
    pub image: String,

    /// Path to write the attestations to (`-` for stdout; kept gzipped
    /// when the path ends in `.gz`).
    #[arg(short = 'a', long = "attestations")]
    pub attestations: Option<PathBuf>,
}

pub async fn execute(args: PullArgs, cancel: &CancellationToken) -> Result<()> {
    let client = Client::new();
    let artefacts = client
        .fetch(cancel, &args.image, &[CONTENT_MEDIA_TYPE, ATTEST_MEDIA_TYPE])
        .await?;

    for artefact in &artefacts {
        match artefact.media_type.as_str() {
            CONTENT_MEDIA_TYPE => {
                let mut archive = tar::Archive::new(GzDecoder::new(artefact.reader()));
                std::fs::create_dir_all(&args.manifest_dir)?;
                archive.unpack(&args.manifest_dir)?;
                tracing::info!(
                    dir = %args.manifest_dir.display(),
                    "extracted manifests"
                );
            }
            ATTEST_MEDIA_TYPE => {
                let Some(destination) = &args.attestations else {
                    continue;
                };
                write_attestations(artefact.reader(), destination)?;
                tracing::info!(
                    path = %destination.display(),
                    "extracted attestations"
                );
            }
            _ => {}
        }
    }
    Ok(())
}

fn write_attestations(compressed: impl Read, destination: &Path) -> Result<()> {
    let mut reader: Box<dyn Read + '_> =
        if destination.extension().and_then(|e| e.to_str()) == Some("gz") {
            Box::new(compressed)
        } else {
            Box::new(GzDecoder::new(compressed))
        };

    if destination == Path::new("-") {
        std::io::copy(&mut reader, &mut std::io::stdout().lock())?;
        return Ok(());
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    std::io::copy(&mut reader, &mut file)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzipped(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    #[test]
    fn attestations_are_gunzipped_by_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let destination = tmp.path().join("statements.jsonl");
        let payload = b"{\"_type\":\"statement\"}\n";

        write_attestations(gzipped(payload).as_slice(), &destination).expect("write");
        let written = std::fs::read(&destination).expect("read back");
        assert_eq!(written, payload);
    }

    #[test]
    fn gz_destination_keeps_compression() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let destination = tmp.path().join("statements.jsonl.gz");
        let compressed = gzipped(b"{}\n");

        write_attestations(compressed.as_slice(), &destination).expect("write");
        let written = std::fs::read(&destination).expect("read back");
        assert_eq!(written, compressed);
    }

    #[test]
    fn refuses_to_overwrite() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let destination = tmp.path().join("statements.jsonl");
        std::fs::write(&destination, "existing").expect("seed file");

        let result = write_attestations(gzipped(b"{}\n").as_slice(), &destination);
        assert!(result.is_err(), "existing files must not be overwritten");
    }
}
