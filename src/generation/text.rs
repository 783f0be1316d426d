use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{GeneratedMyth, MythRequest, MythResult, ProviderError, TextGenerator};

const PROVIDER: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;
const DEFAULT_AGE_MONTHS: i32 = 36;
pub const MAX_TAGS: usize = 4;

const SYSTEM_PROMPT: &str = "You are a gentle storyteller for toddlers (ages 2-4). \
Write in warm, simple English, between 150-300 words, filled with cozy wonder. \
Avoid fear, violence, or harsh conflict. Use concrete, kind, and imaginative imagery. \
Stories should feel calm, safe, and magical, like bedtime tales full of love and curiosity.";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Anthropic Messages API adapter producing a myth from a seed moment
pub struct AnthropicTextGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicTextGenerator {
    pub fn new(http: reqwest::Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn complete(&self, user_prompt: &str) -> Result<(String, Option<String>), ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: user_prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let parsed: MessagesResponse =
            response.json().await.map_err(|source| ProviderError::Http {
                provider: PROVIDER,
                source,
            })?;

        let text = parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or(ProviderError::MissingField {
                provider: PROVIDER,
                field: "content[].text",
            })?;

        Ok((text, parsed.model))
    }
}

#[async_trait]
impl TextGenerator for AnthropicTextGenerator {
    async fn generate_myth(&self, request: &MythRequest) -> Result<GeneratedMyth, ProviderError> {
        let prompt = build_user_prompt(request);
        debug!(theme = %request.theme, "Requesting myth from {}", PROVIDER);

        let (raw, model) = self.complete(&prompt).await?;
        let myth = parse_myth(&raw)?;

        info!(
            title = %myth.title,
            tags = myth.tags.len(),
            "Received myth from {}",
            PROVIDER
        );

        Ok(GeneratedMyth {
            provider_meta: json!({
                "provider": PROVIDER,
                "model": model.unwrap_or_else(|| self.model.clone()),
                "prompt": prompt,
                "result": myth,
            }),
            myth,
        })
    }
}

pub fn build_user_prompt(request: &MythRequest) -> String {
    let description = request
        .child_description
        .as_deref()
        .map(|d| format!("\nChild Description: {}", d))
        .unwrap_or_default();

    let context = request
        .child_context
        .as_deref()
        .map(|c| {
            format!(
                "\n\nIMPORTANT CONTEXT (for consistency, do not explicitly mention in story unless relevant): {}",
                c
            )
        })
        .unwrap_or_default();

    let age = if request.child_age_months > 0 {
        request.child_age_months
    } else {
        DEFAULT_AGE_MONTHS
    };

    format!(
        r#"Seed: "{seed}"
Theme: "{theme}"
ChildName: "{name}"
AgeMonths: {age}{description}{context}

Write JSON only, using the child's name "{name}" as the protagonist:
{{
  "title": "<short poetic title>",
  "story": "<single-paragraph story in english featuring {name}>",
  "tags": ["<1-4 simple tags>"]
}}"#,
        seed = request.seed_text,
        theme = request.theme,
        name = request.child_name,
    )
}

/// Slice from the first `{` to the last `}`; the model may wrap its JSON in prose
pub fn extract_json_object(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (start <= end).then(|| &output[start..=end])
}

/// Extract and validate `{title, story, tags}` from the model's free text
pub fn parse_myth(output: &str) -> Result<MythResult, ProviderError> {
    let json_str = extract_json_object(output).ok_or_else(|| ProviderError::InvalidResponse {
        provider: PROVIDER,
        reason: "no JSON object found in response".to_string(),
    })?;

    let value: Value =
        serde_json::from_str(json_str).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER,
            reason: format!("malformed JSON: {}", e),
        })?;

    let title = required_text(&value, "title")?;
    let story = required_text(&value, "story")?;

    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .ok_or(ProviderError::MissingField {
            provider: PROVIDER,
            field: "tags",
        })?;

    let tags = tags
        .iter()
        .map(|tag| {
            tag.as_str()
                .map(|t| t.trim().to_string())
                .ok_or_else(|| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    reason: "tags must be strings".to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|t| !t.is_empty())
        .take(MAX_TAGS)
        .collect();

    Ok(MythResult { title, story, tags })
}

fn required_text(value: &Value, field: &'static str) -> Result<String, ProviderError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ProviderError::MissingField {
            provider: PROVIDER,
            field,
        })
}
