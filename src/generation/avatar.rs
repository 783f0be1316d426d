use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::gemini::GeminiClient;
use super::storage::{avatar_path, ObjectStore};
use super::{AvatarGenerator, AvatarRequest, GeneratedImage, GenerationError};

const DEFAULT_PHOTO_DESCRIPTION: &str = "a cheerful child";
const DEFAULT_DESCRIPTION: &str = "a cheerful, happy child";

pub struct GeminiAvatarGenerator {
    client: GeminiClient,
    store: Arc<dyn ObjectStore>,
}

impl GeminiAvatarGenerator {
    pub fn new(client: GeminiClient, store: Arc<dyn ObjectStore>) -> Self {
        Self { client, store }
    }
}

fn age_label(age_months: Option<i32>) -> String {
    match age_months {
        Some(months) if months >= 24 => format!("{} years", months / 12),
        Some(months) if months >= 0 => format!("{} months", months),
        _ => "unknown".to_string(),
    }
}

pub fn avatar_prompt(request: &AvatarRequest) -> String {
    let age = age_label(request.child_age_months);

    if request.photo.is_some() {
        format!(
            "Create a cute, child-friendly cartoon avatar based on this photo.\n\
             The avatar should be colorful, whimsical, and suitable for children's storybooks.\n\
             Style: Digital illustration, soft colors, friendly and happy expression.\n\
             If the photo is not of a child or person, create a random cute character based on \
             the name \"{}\", age {}, use something from this description: {}.",
            request.child_name,
            age,
            request.description.as_deref().unwrap_or(DEFAULT_PHOTO_DESCRIPTION)
        )
    } else {
        format!(
            "Create a cute, child-friendly cartoon avatar for a character named \"{}\", age {}.\n\
             Description: {}\n\
             Style: Colorful digital illustration, whimsical, suitable for children's storybooks, \
             friendly and happy expression.",
            request.child_name,
            age,
            request.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION)
        )
    }
}

#[async_trait]
impl AvatarGenerator for GeminiAvatarGenerator {
    async fn generate_avatar(
        &self,
        request: &AvatarRequest,
    ) -> Result<GeneratedImage, GenerationError> {
        let prompt = avatar_prompt(request);
        let bytes = self
            .client
            .generate_image(&prompt, request.photo.as_ref())
            .await?;

        let path = avatar_path(&request.user_id, &request.child_name, Utc::now());
        let image_url = self.store.put_png(&path, bytes).await?;

        info!(path = %path, from_photo = request.photo.is_some(), "Stored generated avatar");

        Ok(GeneratedImage {
            image_url,
            provider_meta: json!({
                "provider": self.client.model(),
                "prompt": prompt,
                "storagePath": path,
            }),
        })
    }
}
