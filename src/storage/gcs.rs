//! Google Cloud Storage backend.
//!
//! Reads objects through the GCS JSON API using `reqwest`.  Object bodies
//! are streamed straight from the upstream response, never buffered.
//!
//! Credentials are resolved lazily on the first request, in order:
//!   - `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable
//!   - gcloud application default credentials (`authorized_user` type),
//!     from `credentials_file`, `GOOGLE_APPLICATION_CREDENTIALS`, or the
//!     gcloud config directory
//!   - GCE metadata server (when running on Google Cloud)
//!
//! With `anonymous` set no `Authorization` header is sent, which is what
//! emulators such as fake-gcs-server expect.

use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::backend::{ObjectAttrs, ObjectStore, ObjectStream, StorageError, StoreFuture};
use crate::config::GcsStorageConfig;

/// Token endpoint for refreshing `authorized_user` credentials.
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// GCE metadata server token endpoint.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
struct GcsObject {
    /// Object size; the JSON API encodes 64-bit integers as strings.
    size: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

// -- Token management ---------------------------------------------------------

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Storage backend reading from Google Cloud Storage.
pub struct GcsBackend {
    /// HTTP client for GCS JSON API calls.
    client: reqwest::Client,
    /// API base URL, without a trailing slash.
    endpoint: String,
    /// Explicit credentials file, if configured.
    credentials_file: Option<String>,
    /// Skip authentication entirely.
    anonymous: bool,
    /// Cached OAuth2 access token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBackend")
            .field("endpoint", &self.endpoint)
            .field("anonymous", &self.anonymous)
            .finish_non_exhaustive()
    }
}

impl GcsBackend {
    /// Create a new GCS backend from configuration.
    ///
    /// No network traffic happens here; credentials are resolved on the
    /// first API call.
    pub fn new(config: &GcsStorageConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let credentials_file = if config.credentials_file.is_empty() {
            None
        } else {
            Some(config.credentials_file.clone())
        };

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            credentials_file,
            anonymous: config.anonymous,
            token_cache: Mutex::new(None),
        })
    }

    /// Metadata URL for `bucket/key`.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            url_encode(bucket),
            url_encode(key)
        )
    }

    /// Get an OAuth2 access token, reusing the cached one until 60s before
    /// it expires.
    async fn access_token(&self) -> anyhow::Result<String> {
        {
            let cache = self.token_cache.lock().expect("token cache mutex poisoned");
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let token = self.fetch_access_token().await?;
        let expiry = Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        let access_token = token.access_token;

        {
            let mut cache = self.token_cache.lock().expect("token cache mutex poisoned");
            *cache = Some(CachedToken {
                access_token: access_token.clone(),
                expiry,
            });
        }

        Ok(access_token)
    }

    /// Fetch a fresh access token from the first credential source that
    /// is available.
    async fn fetch_access_token(&self) -> anyhow::Result<TokenResponse> {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            return Ok(TokenResponse {
                access_token: token,
                expires_in: default_expires_in(),
            });
        }

        let creds_path = self
            .credentials_file
            .clone()
            .or_else(|| std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok())
            .unwrap_or_else(application_default_credentials_path);
        if let Ok(true) = tokio::fs::try_exists(&creds_path).await {
            return self.token_from_credentials_file(&creds_path).await;
        }

        self.token_from_metadata_server().await
    }

    /// Obtain an access token from an `authorized_user` credentials file.
    async fn token_from_credentials_file(&self, path: &str) -> anyhow::Result<TokenResponse> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read credentials file {path}: {e}"))?;
        let creds: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse credentials file {path}: {e}"))?;

        let cred_type = creds.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if cred_type != "authorized_user" {
            // Service account keys need RSA JWT signing; the metadata server
            // covers workloads running on Google Cloud.
            debug!("Credentials type '{cred_type}' in {path} not usable, trying metadata server");
            return self.token_from_metadata_server().await;
        }

        let field = |name: &str| {
            creds
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let resp = self
            .client
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("client_id", field("client_id")),
                ("client_secret", field("client_secret")),
                ("refresh_token", field("refresh_token")),
                ("grant_type", "refresh_token".to_string()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token refresh request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Token refresh failed ({status}): {body}"));
        }
        Ok(resp.json().await?)
    }

    /// Obtain an access token from the GCE metadata server.
    async fn token_from_metadata_server(&self) -> anyhow::Result<TokenResponse> {
        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Metadata server request failed: {e}. Set GOOGLE_APPLICATION_CREDENTIALS, \
                     run 'gcloud auth application-default login', or set GOOGLE_OAUTH_ACCESS_TOKEN"
                )
            })?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "Metadata server returned {}: set GOOGLE_APPLICATION_CREDENTIALS or \
                 GOOGLE_OAUTH_ACCESS_TOKEN",
                resp.status()
            ));
        }
        Ok(resp.json().await?)
    }

    /// Build authorization headers for GCS API calls.
    async fn auth_headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if self.anonymous {
            return Ok(headers);
        }
        let token = self.access_token().await?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid auth header value: {e}"))?,
        );
        Ok(headers)
    }

    /// Send a GET for `url`, mapping error statuses to [`StorageError`].
    async fn get(
        &self,
        context: &str,
        url: &str,
        query: &[(&str, &str)],
        mut headers: HeaderMap,
    ) -> Result<reqwest::Response, StorageError> {
        headers.extend(self.auth_headers().await?);
        let resp = self
            .client
            .get(url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GCS {context} request failed: {e}"))?;

        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(map_gcs_error(context, status, &body))
    }
}

/// Get the path to gcloud application-default credentials.
fn application_default_credentials_path() -> String {
    if let Ok(config_dir) = std::env::var("CLOUDSDK_CONFIG") {
        return format!("{config_dir}/application_default_credentials.json");
    }
    if let Ok(home) = std::env::var("HOME") {
        return format!("{home}/.config/gcloud/application_default_credentials.json");
    }
    ".config/gcloud/application_default_credentials.json".to_string()
}

/// URL-encode a bucket or object name for use in API paths.
fn url_encode(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
}

/// Message prefix GCS uses for a missing object (`No such object: b/k`).
const NO_SUCH_OBJECT: &str = "No such object:";

/// Message GCS uses for a missing bucket.
const NO_SUCH_BUCKET: &str = "The specified bucket does not exist";

/// Map a GCS HTTP error to a [`StorageError`].
///
/// A 404 is a missing bucket only when the upstream message is the
/// missing-bucket text; every other 404 is a missing object.
fn map_gcs_error(context: &str, status: StatusCode, body: &str) -> StorageError {
    let detail = serde_json::from_str::<GcsErrorResponse>(body)
        .ok()
        .and_then(|r| r.error);

    if status == StatusCode::NOT_FOUND {
        let message = detail
            .as_ref()
            .and_then(|d| d.message.as_deref())
            .unwrap_or_default();
        return if message.starts_with(NO_SUCH_OBJECT) {
            StorageError::ObjectNotExist
        } else if message.starts_with(NO_SUCH_BUCKET) {
            StorageError::BucketNotExist
        } else {
            StorageError::ObjectNotExist
        };
    }

    let err = match detail {
        Some(err) => anyhow::anyhow!(
            "GCS {}: {} (code {})",
            context,
            err.message.unwrap_or_default(),
            err.code.unwrap_or(status.as_u16())
        ),
        None => anyhow::anyhow!("GCS {context}: HTTP {status} - {body}"),
    };
    StorageError::Other(err)
}

/// Turn a response body into an [`ObjectStream`].
fn body_stream(resp: reqwest::Response) -> ObjectStream {
    Box::pin(resp.bytes_stream().map_err(std::io::Error::other))
}

impl ObjectStore for GcsBackend {
    fn stat<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectAttrs> {
        Box::pin(async move {
            debug!("GCS stat: bucket={} name={}", bucket, key);
            let url = self.object_url(bucket, key);
            let resp = self
                .get("stat", &url, &[("fields", "size,contentType")], HeaderMap::new())
                .await?;
            let obj: GcsObject = resp
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("GCS stat: malformed object metadata: {e}"))?;
            let size = obj
                .size
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("GCS stat: invalid size '{}': {e}", obj.size))?;
            Ok(ObjectAttrs {
                size,
                content_type: obj.content_type,
            })
        })
    }

    fn read<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectStream> {
        Box::pin(async move {
            debug!("GCS read: bucket={} name={}", bucket, key);
            let url = self.object_url(bucket, key);
            let resp = self
                .get("read", &url, &[("alt", "media")], HeaderMap::new())
                .await?;
            Ok(body_stream(resp))
        })
    }

    fn read_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, ObjectStream> {
        Box::pin(async move {
            debug!(
                "GCS read range: bucket={} name={} bytes={}-{}",
                bucket, key, start, end
            );
            let url = self.object_url(bucket, key);
            let mut headers = HeaderMap::new();
            headers.insert(
                RANGE,
                HeaderValue::from_str(&format!("bytes={start}-{end}"))
                    .map_err(|e| anyhow::anyhow!("Invalid range header value: {e}"))?,
            );
            let resp = self
                .get("read range", &url, &[("alt", "media")], headers)
                .await?;
            // A 200 here means the upstream ignored the range and is sending
            // the whole object, which would break the advertised length.
            if resp.status() != StatusCode::PARTIAL_CONTENT {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "GCS read range: expected 206, got {}",
                    resp.status()
                )));
            }
            Ok(body_stream(resp))
        })
    }
}

// -- Tests -------------------------------------------------------------------
