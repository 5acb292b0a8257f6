//! Typed client over the OCI distribution HTTP API.
//!
//! Every operation takes a cancellation token and aborts promptly when
//! it fires. Authentication is negotiated per registry: anonymous first,
//! then a bearer token fetched from the `WWW-Authenticate` challenge,
//! optionally with basic credentials from `REGISTRY_USERNAME` /
//! `REGISTRY_PASSWORD`. Nothing outside this module touches credentials.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use oci_spec::image::{ImageIndex, ImageManifest};
use regex::Regex;
use reqwest::header;
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::OciError;
use crate::reference::Reference;

const USER_AGENT: &str = "spindle/v1";

const ACCEPT_MANIFEST: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// A manifest response dispatched by its top-level media type: either an
/// index (multi-platform) or a single image manifest.
pub struct IndexOrImage {
    pub digest: String,
    pub media_type: String,
    pub raw: Vec<u8>,
    pub index: Option<ImageIndex>,
    pub image: Option<ImageManifest>,
}

/// A tag discovered next to an image by digest-prefix convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedTag {
    pub name: String,
    pub tag: String,
    pub digest: String,
}

/// Registry client; holds only short-lived resources and is safe to
/// reuse across operations within a run.
pub struct Client {
    http: reqwest::Client,
    tokens: Mutex<HashMap<String, String>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a future unless the token fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, OciError> {
    tokio::select! {
        () = cancel.cancelled() => Err(OciError::Cancelled),
        value = future => Ok(value),
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn base_url(reference: &Reference) -> String {
        let host = if reference.registry == "docker.io" {
            "registry-1.docker.io"
        } else {
            reference.registry.as_str()
        };
        let scheme = if host.starts_with("localhost")
            || host.starts_with("127.")
            || host.starts_with("[::1]")
        {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{host}/v2/{}", reference.repository)
    }

    fn auth_key(reference: &Reference) -> String {
        format!("{}/{}", reference.registry, reference.repository)
    }

    fn cached_token(&self, key: &str) -> Option<String> {
        self.tokens.lock().ok()?.get(key).cloned()
    }

    /// Send a request, negotiating a bearer token on a 401 challenge.
    async fn send(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OciError> {
        let key = Self::auth_key(reference);
        let retry = request.try_clone();
        let request = match self.cached_token(&key) {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = cancellable(cancel, request.send()).await??;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let (Some(challenge), Some(retry)) = (challenge, retry) else {
            return Ok(response);
        };
        let token = self.fetch_token(cancel, &challenge).await?;
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(key, token.clone());
        }
        Ok(cancellable(cancel, retry.bearer_auth(token).send()).await??)
    }

    /// Fetch a bearer token for a `WWW-Authenticate: Bearer …` challenge.
    async fn fetch_token(
        &self,
        cancel: &CancellationToken,
        challenge: &str,
    ) -> Result<String, OciError> {
        let params = parse_challenge(challenge);
        let realm = params.get("realm").cloned().unwrap_or_default();
        let mut request = self.http.get(&realm);
        if let Some(service) = params.get("service") {
            request = request.query(&[("service", service)]);
        }
        if let Some(scope) = params.get("scope") {
            request = request.query(&[("scope", scope)]);
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("REGISTRY_USERNAME"),
            std::env::var("REGISTRY_PASSWORD"),
        ) {
            request = request.basic_auth(username, Some(password));
        }
        let response = cancellable(cancel, request.send())
            .await??
            .error_for_status()?;
        let body = cancellable(cancel, response.json::<serde_json::Value>()).await??;
        let token = body["token"]
            .as_str()
            .or_else(|| body["access_token"].as_str())
            .unwrap_or_default();
        Ok(token.to_owned())
    }

    /// Resolve the content digest of a manifest via `HEAD`, falling back
    /// to hashing a `GET` body when the registry omits the digest header.
    pub async fn digest(
        &self,
        cancel: &CancellationToken,
        reference: &str,
    ) -> Result<String, OciError> {
        let parsed = Reference::parse(reference)?;
        let url = format!(
            "{}/manifests/{}",
            Self::base_url(&parsed),
            parsed.manifest_reference()
        );
        let response = self
            .send(
                cancel,
                &parsed,
                self.http
                    .head(&url)
                    .header(header::ACCEPT, ACCEPT_MANIFEST),
            )
            .await?;
        if response.status().is_success() {
            if let Some(digest) = response
                .headers()
                .get("Docker-Content-Digest")
                .and_then(|v| v.to_str().ok())
            {
                return Ok(digest.to_owned());
            }
        }
        let manifest = self.get_manifest(cancel, &parsed).await?;
        Ok(manifest.digest)
    }

    /// Fetch raw manifest bytes along with their media type and digest.
    pub async fn get_manifest(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
    ) -> Result<RawManifest, OciError> {
        self.get_manifest_by(cancel, reference, &reference.manifest_reference())
            .await
    }

    async fn get_manifest_by(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        manifest_reference: &str,
    ) -> Result<RawManifest, OciError> {
        let url = format!(
            "{}/manifests/{manifest_reference}",
            Self::base_url(reference)
        );
        let response = self
            .send(
                cancel,
                reference,
                self.http.get(&url).header(header::ACCEPT, ACCEPT_MANIFEST),
            )
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OCI_MANIFEST_MEDIA_TYPE)
            .to_owned();
        let digest_header = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = cancellable(cancel, response.bytes()).await??.to_vec();
        let digest = digest_header
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(&bytes))));
        Ok(RawManifest {
            bytes,
            media_type,
            digest,
        })
    }

    /// `HEAD`/`GET` a reference and dispatch on the top-level media type.
    /// Empty indices fail with [`OciError::EmptyIndex`].
    pub async fn get_index_or_image(
        &self,
        cancel: &CancellationToken,
        reference: &str,
    ) -> Result<IndexOrImage, OciError> {
        let parsed = Reference::parse(reference)?;
        let manifest = self.get_manifest(cancel, &parsed).await?;
        if manifest.media_type == OCI_INDEX_MEDIA_TYPE
            || manifest.media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE
        {
            let index: ImageIndex = serde_json::from_slice(&manifest.bytes)?;
            if index.manifests().is_empty() {
                return Err(OciError::EmptyIndex(reference.to_owned()));
            }
            Ok(IndexOrImage {
                digest: manifest.digest,
                media_type: manifest.media_type,
                raw: manifest.bytes,
                index: Some(index),
                image: None,
            })
        } else {
            let image: ImageManifest = serde_json::from_slice(&manifest.bytes)?;
            Ok(IndexOrImage {
                digest: manifest.digest,
                media_type: manifest.media_type,
                raw: manifest.bytes,
                index: None,
                image: Some(image),
            })
        }
    }

    /// Copy `src` to `dst` (blobs, then manifests, indices recursively),
    /// then re-read the destination digest and fail on any disagreement.
    pub async fn copy(
        &self,
        cancel: &CancellationToken,
        src: &str,
        dst: &str,
        expected_digest: &str,
    ) -> Result<(), OciError> {
        let src_ref = Reference::parse(src)?;
        let dst_ref = Reference::parse(dst)?;
        let src_name = src_ref.manifest_reference();
        let dst_name = dst_ref.manifest_reference();
        self.copy_manifest(cancel, &src_ref, &dst_ref, &src_name, &dst_name)
            .await?;
        let observed = self.digest(cancel, dst).await?;
        if observed != expected_digest {
            return Err(OciError::DigestMismatch {
                expected: expected_digest.to_owned(),
                actual: observed,
            });
        }
        Ok(())
    }

    async fn copy_manifest(
        &self,
        cancel: &CancellationToken,
        src: &Reference,
        dst: &Reference,
        src_name: &str,
        dst_name: &str,
    ) -> Result<(), OciError> {
        let manifest = self.get_manifest_by(cancel, src, src_name).await?;
        if manifest.media_type == OCI_INDEX_MEDIA_TYPE
            || manifest.media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE
        {
            let index: ImageIndex = serde_json::from_slice(&manifest.bytes)?;
            for descriptor in index.manifests() {
                let digest = descriptor.digest().to_string();
                // recursion depth is bounded by the two-level index format
                Box::pin(self.copy_manifest(cancel, src, dst, &digest, &digest)).await?;
            }
        } else {
            let image: ImageManifest = serde_json::from_slice(&manifest.bytes)?;
            let mut digests = vec![image.config().digest().to_string()];
            for layer in image.layers() {
                digests.push(layer.digest().to_string());
            }
            for digest in digests {
                self.copy_blob(cancel, src, dst, &digest).await?;
            }
        }
        self.put_manifest(cancel, dst, dst_name, &manifest.media_type, &manifest.bytes)
            .await
    }

    async fn copy_blob(
        &self,
        cancel: &CancellationToken,
        src: &Reference,
        dst: &Reference,
        digest: &str,
    ) -> Result<(), OciError> {
        if self.blob_exists(cancel, dst, digest).await? {
            return Ok(());
        }
        let data = self.get_blob(cancel, src, digest).await?;
        self.push_blob(cancel, dst, digest, data).await
    }

    pub async fn blob_exists(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        digest: &str,
    ) -> Result<bool, OciError> {
        let url = format!("{}/blobs/{digest}", Self::base_url(reference));
        let response = self
            .send(cancel, reference, self.http.head(&url))
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn get_blob(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        digest: &str,
    ) -> Result<Vec<u8>, OciError> {
        let url = format!("{}/blobs/{digest}", Self::base_url(reference));
        let response = self
            .send(cancel, reference, self.http.get(&url))
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(cancellable(cancel, response.bytes()).await??.to_vec())
    }

    pub async fn push_blob(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        digest: &str,
        data: Vec<u8>,
    ) -> Result<(), OciError> {
        if self.blob_exists(cancel, reference, digest).await? {
            return Ok(());
        }
        let url = format!("{}/blobs/uploads/", Self::base_url(reference));
        let response = self
            .send(cancel, reference, self.http.post(&url))
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| OciError::UnexpectedStatus {
                url: url.clone(),
                status: response.status().as_u16(),
            })?;
        let upload_url = absolute_location(&location, reference);
        let separator = if upload_url.contains('?') { '&' } else { '?' };
        let put_url = format!("{upload_url}{separator}digest={digest}");
        let response = self
            .send(
                cancel,
                reference,
                self.http
                    .put(&put_url)
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(data),
            )
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url: put_url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    pub async fn put_manifest(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
        name: &str,
        media_type: &str,
        bytes: &[u8],
    ) -> Result<(), OciError> {
        let url = format!("{}/manifests/{name}", Self::base_url(reference));
        let response = self
            .send(
                cancel,
                reference,
                self.http
                    .put(&url)
                    .header(header::CONTENT_TYPE, media_type)
                    .body(bytes.to_vec()),
            )
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    pub async fn list_tags(
        &self,
        cancel: &CancellationToken,
        reference: &Reference,
    ) -> Result<Vec<String>, OciError> {
        let url = format!("{}/tags/list?n=1000", Self::base_url(reference));
        let response = self
            .send(cancel, reference, self.http.get(&url))
            .await?;
        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let body = cancellable(cancel, response.json::<serde_json::Value>()).await??;
        let mut tags: Vec<String> = body["tags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        tags.sort();
        Ok(tags)
    }

    /// List tags in the image's repository whose names begin with the
    /// digest-derived prefix (`sha256:` → `sha256-`), which is how Cosign
    /// stores `.sig`, `.att`, and `.sbom` artefacts.
    pub async fn list_related(
        &self,
        cancel: &CancellationToken,
        name: &str,
        digest: &str,
    ) -> Result<Vec<RelatedTag>, OciError> {
        let reference = Reference::parse(name)?;
        let prefix = digest.replace(':', "-");
        let pattern = Regex::new(&format!("^{}.*", regex::escape(&prefix)))
            .map_err(|e| OciError::InvalidReference {
                reference: digest.to_owned(),
                reason: e.to_string(),
            })?;

        let mut related = Vec::new();
        for tag in self.list_tags(cancel, &reference).await? {
            if !pattern.is_match(&tag) {
                continue;
            }
            let tag_ref = format!("{name}:{tag}");
            let tag_digest = self.digest(cancel, &tag_ref).await?;
            related.push(RelatedTag {
                name: name.to_owned(),
                tag,
                digest: tag_digest,
            });
        }
        Ok(related)
    }
}

/// Raw manifest bytes plus the response metadata needed to re-push them.
pub struct RawManifest {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub digest: String,
}

fn absolute_location(location: &str, reference: &Reference) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_owned();
    }
    let base = Client::base_url(reference);
    // base ends with /v2/<repo>; upload locations are host-relative
    match base.find("/v2/") {
        Some(v2) => format!("{}{}", &base[..v2], location),
        None => location.to_owned(),
    }
}

fn parse_challenge(challenge: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let rest = challenge.trim_start_matches("Bearer ").trim();
    for part in rest.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            params.insert(key.to_owned(), value.trim_matches('"').to_owned());
        }
    }
    params
}
