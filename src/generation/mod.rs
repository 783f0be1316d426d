//! Adapters for the external generation providers and object storage.
//!
//! Each adapter turns a narrow domain request into the provider's request
//! shape and validates the response. None of them retry, cache or queue;
//! retry policy belongs to the orchestrator in [`crate::forge`].

pub mod avatar;
pub mod gemini;
pub mod image;
pub mod placeholder;
pub mod storage;
pub mod text;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote provider call failed or returned something unusable
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{provider} response is missing {field}")]
    MissingField {
        provider: &'static str,
        field: &'static str,
    },

    #[error("{provider} response is invalid: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Generated bytes could not be persisted to object storage
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object path '{0}' is not allowed")]
    InvalidPath(String),

    #[error("failed to write object {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upload of {path} rejected with HTTP {status}")]
    Rejected { path: String, status: u16 },
}

/// Failure of a generation step. `Storage` means the provider produced an
/// image that could not be stored; both variants fail the chapter.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProviderError {
    /// Transport failures, throttling and upstream 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            // 529 is Anthropic's overloaded signal
            ProviderError::Status { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
            }
            _ => false,
        }
    }
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Upload { .. } => true,
            StorageError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Provider(_) => "provider",
            GenerationError::Storage(_) => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Provider(e) => e.is_retryable(),
            GenerationError::Storage(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MythRequest {
    pub seed_text: String,
    pub theme: String,
    pub child_age_months: i32,
    pub child_name: String,
    pub child_description: Option<String>,
    pub child_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MythResult {
    pub title: String,
    pub story: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedMyth {
    pub myth: MythResult,
    pub provider_meta: Value,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Owner of the resulting object; used to namespace the storage path
    pub user_id: String,
    pub prompt: String,
    pub theme: String,
    pub reference_image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image_url: String,
    pub provider_meta: Value,
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AvatarRequest {
    pub user_id: String,
    pub child_name: String,
    pub child_age_months: Option<i32>,
    pub description: Option<String>,
    pub photo: Option<InlineImage>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_myth(&self, request: &MythRequest) -> Result<GeneratedMyth, ProviderError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest)
        -> Result<GeneratedImage, GenerationError>;
}

#[async_trait]
pub trait AvatarGenerator: Send + Sync {
    async fn generate_avatar(
        &self,
        request: &AvatarRequest,
    ) -> Result<GeneratedImage, GenerationError>;
}
