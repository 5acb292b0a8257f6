//! Artefact packaging orchestration.
//!
//! Thin wrapper over the OCI artefact codec: points it at the updated
//! manifest directory, the source-epoch timestamp, and the sorted
//! statement stream, and pushes the result.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use spindle_attest::Statement;
use spindle_oci::Client;

use crate::error::ManifestError;

pub struct Packager<'a> {
    client: &'a Client,
    destination: String,
}

impl<'a> Packager<'a> {
    pub fn new(client: &'a Client, destination: impl Into<String>) -> Self {
        Self {
            client,
            destination: destination.into(),
        }
    }

    /// Package `dir` and push the index, returning the
    /// `<destination>:<alias-tag>@<digest>` reference.
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        source_epoch: Option<DateTime<Utc>>,
        statements: &[Statement],
    ) -> Result<String, ManifestError> {
        let reference = self
            .client
            .push_artefact(cancel, &self.destination, dir, source_epoch, statements)
            .await?;
        Ok(reference)
    }
}
