//! Object storage client.
//!
//! `ObjectStore` is the seam the create workflow talks to; `GcsObjectStore`
//! implements it against the Google Cloud Storage JSON API. Objects are
//! uploaded with the `publicRead` ACL, so their URL can be derived from the
//! bucket and key without asking the provider.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::json;
use std::{
    io,
    path::Path,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{fs::File, sync::Mutex};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::StorageConfig;

/// Cache directive attached to every uploaded photo (one year).
pub const CACHE_CONTROL: &str = "public, max-age=31536000";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata-server tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("reading local file: {0}")]
    Io(#[from] io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("could not obtain access token: {0}")]
    Auth(String),
}

/// One object to upload from local disk.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub local_path: &'a Path,
    pub key: &'a str,
    pub content_type: &'a str,
    /// Base64 MD5 of the content; the provider rejects mismatches.
    pub md5_base64: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Base URL under which objects are publicly served.
    fn public_base_url(&self) -> &str;

    /// Upload a local file as a publicly readable, long-cached object.
    async fn upload(&self, req: UploadRequest<'_>) -> Result<(), ObjectStoreError>;

    fn public_url(&self, key: &str) -> String {
        public_url(self.public_base_url(), self.bucket(), key)
    }
}

/// `<base>/<bucket>/<key>`
pub fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}

enum Credentials {
    Anonymous,
    Static(String),
    MetadataServer(Mutex<Option<CachedToken>>),
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Google Cloud Storage over the JSON API.
pub struct GcsObjectStore {
    client: reqwest::Client,
    bucket: String,
    api_base_url: String,
    public_base_url: String,
    credentials: Credentials,
}

impl GcsObjectStore {
    pub fn new(client: reqwest::Client, cfg: &StorageConfig) -> Self {
        let credentials = if cfg.anonymous {
            Credentials::Anonymous
        } else if let Some(token) = &cfg.access_token {
            Credentials::Static(token.clone())
        } else {
            Credentials::MetadataServer(Mutex::new(None))
        };

        Self {
            client,
            bucket: cfg.bucket.clone(),
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=multipart&predefinedAcl=publicRead",
            self.api_base_url, self.bucket
        )
    }

    async fn bearer_token(&self) -> Result<Option<String>, ObjectStoreError> {
        match &self.credentials {
            Credentials::Anonymous => Ok(None),
            Credentials::Static(token) => Ok(Some(token.clone())),
            Credentials::MetadataServer(cache) => {
                let mut cached = cache.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(Some(token.value.clone()));
                    }
                }

                debug!("fetching access token from metadata server");
                let resp = self
                    .client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| ObjectStoreError::Auth(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(ObjectStoreError::Auth(format!(
                        "metadata server returned {}",
                        resp.status()
                    )));
                }
                let token: MetadataToken = resp
                    .json()
                    .await
                    .map_err(|e| ObjectStoreError::Auth(e.to_string()))?;

                let lifetime = Duration::from_secs(token.expires_in);
                let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN);
                let value = token.access_token;
                *cached = Some(CachedToken {
                    value: value.clone(),
                    refresh_at,
                });
                Ok(Some(value))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[instrument(skip(self, req), fields(key = %req.key))]
    async fn upload(&self, req: UploadRequest<'_>) -> Result<(), ObjectStoreError> {
        let file = File::open(req.local_path).await?;
        let file_len = file.metadata().await?.len();

        let boundary = format!("penduduk-{}", Uuid::new_v4().simple());
        let metadata = object_metadata(req.key, req.content_type, req.md5_base64.as_deref());
        let head = Bytes::from(multipart_head(&boundary, &metadata, req.content_type));
        let tail = Bytes::from(multipart_tail(&boundary));
        let content_length = head.len() as u64 + file_len + tail.len() as u64;

        let body = stream::once(async move { Ok::<_, io::Error>(head) })
            .chain(ReaderStream::new(file))
            .chain(stream::once(async move { Ok(tail) }));

        let mut request = self
            .client
            .post(self.upload_url())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body));
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(bytes = file_len, "object uploaded");
        Ok(())
    }
}

fn object_metadata(key: &str, content_type: &str, md5_base64: Option<&str>) -> serde_json::Value {
    let mut metadata = json!({
        "name": key,
        "contentType": content_type,
        "cacheControl": CACHE_CONTROL,
    });
    if let Some(md5) = md5_base64 {
        metadata["md5Hash"] = json!(md5);
    }
    metadata
}

/// Metadata part plus the headers of the media part of a
/// `multipart/related` upload body.
fn multipart_head(boundary: &str, metadata: &serde_json::Value, content_type: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {ct}\r\n\r\n",
        b = boundary,
        m = metadata,
        ct = content_type
    )
}

fn multipart_tail(boundary: &str) -> String {
    format!("\r\n--{}--\r\n", boundary)
}
