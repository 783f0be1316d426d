use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use std::path::PathBuf;
use tracing::{debug, info};

use super::StorageError;

pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://firebasestorage.googleapis.com";

/// Destination for generated PNGs. Returns the public URL of the stored object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_png(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// `{userId}/genimg/{millis}-{suffix}.png`
pub fn generated_image_path(user_id: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    format!("{}/genimg/{}-{}.png", user_id, now.timestamp_millis(), suffix)
}

/// `{userId}/avatar/{yyMMddHHmmss}_{name}_avatar.png`, with the name reduced
/// to lowercase ASCII alphanumerics
pub fn avatar_path(user_id: &str, child_name: &str, now: DateTime<Utc>) -> String {
    let sanitized: String = child_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    format!(
        "{}/avatar/{}_{}_avatar.png",
        user_id,
        now.format("%y%m%d%H%M%S"),
        sanitized
    )
}

/// Reject paths that could escape the store root or address nothing
pub fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Writes objects below a directory that the HTTP server exposes at `/media`
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_png(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        validate_object_path(path)?;

        let target = self.root.join(path);
        let io_error = |source| StorageError::Io {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&target, &bytes).await.map_err(io_error)?;

        debug!(path = %path, bytes = bytes.len(), "Stored object on local disk");
        Ok(format!("{}/media/{}", self.public_base_url, path))
    }
}

/// Firebase Storage bucket written through the GCS JSON upload API
pub struct FirebaseObjectStore {
    http: Client,
    bucket: String,
    access_token: Option<String>,
    upload_base_url: String,
    download_base_url: String,
}

impl FirebaseObjectStore {
    pub fn new(http: Client, bucket: String, access_token: Option<String>) -> Self {
        Self {
            http,
            bucket,
            access_token,
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
        }
    }

    pub fn with_base_urls(mut self, upload: &str, download: &str) -> Self {
        self.upload_base_url = upload.trim_end_matches('/').to_string();
        self.download_base_url = download.trim_end_matches('/').to_string();
        self
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/v0/b/{}/o/{}?alt=media",
            self.download_base_url,
            self.bucket,
            urlencoding::encode(path)
        )
    }
}

#[async_trait]
impl ObjectStore for FirebaseObjectStore {
    async fn put_png(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        validate_object_path(path)?;

        let size = bytes.len();
        let mut request = self
            .http
            .post(format!(
                "{}/upload/storage/v1/b/{}/o",
                self.upload_base_url, self.bucket
            ))
            .query(&[("uploadType", "media"), ("name", path)])
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes);

        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| StorageError::Upload {
            path: path.to_string(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(StorageError::Rejected {
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }

        info!(path = %path, bytes = size, bucket = %self.bucket, "Uploaded object to bucket");
        Ok(self.public_url(path))
    }
}
