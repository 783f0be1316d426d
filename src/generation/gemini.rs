use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{InlineImage, ProviderError};

pub const PROVIDER: &str = "gemini";
const DEFAULT_REFERENCE_MIME: &str = "image/png";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

/// Thin `generateContent` client shared by the image and avatar adapters
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask for an image-only response and return the decoded bytes of the
    /// first inline image part
    pub async fn generate_image(
        &self,
        prompt: &str,
        reference: Option<&InlineImage>,
    ) -> Result<Vec<u8>, ProviderError> {
        let mut parts = vec![RequestPart::Text { text: prompt }];
        if let Some(image) = reference {
            parts.push(RequestPart::Inline {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.data),
                },
            });
        }

        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
            },
        };

        debug!(
            model = %self.model,
            with_reference = reference.is_some(),
            "Requesting image from {}",
            PROVIDER
        );

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: response.status().as_u16(),
            });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        let encoded = parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.inline_data)
            .map(|inline| inline.data)
            .filter(|data| !data.is_empty())
            .ok_or(ProviderError::MissingField {
                provider: PROVIDER,
                field: "candidates[].content.parts[].inlineData.data",
            })?;

        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("image data is not valid base64: {}", e),
            })
    }

    /// Download a reference image. Any failure yields `None` so the caller
    /// can continue with a text-only prompt.
    pub async fn fetch_reference(&self, url: &str) -> Option<InlineImage> {
        let response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "Reference image fetch was rejected");
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch reference image: {}", e);
                return None;
            }
        };

        let mime_type = reference_mime_type(response.headers());

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(InlineImage {
                mime_type,
                data: bytes.to_vec(),
            }),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read reference image body: {}", e);
                None
            }
        }
    }
}

/// Image MIME type from `Content-Type`, without parameters; png otherwise
fn reference_mime_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or_else(|| DEFAULT_REFERENCE_MIME.to_string())
}
