use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::gemini::GeminiClient;
use super::storage::{generated_image_path, ObjectStore};
use super::{GeneratedImage, GenerationError, ImageGenerator, ImageRequest};

/// Gemini illustration adapter. Generated PNGs are persisted through the
/// configured object store.
pub struct GeminiImageGenerator {
    client: GeminiClient,
    store: Arc<dyn ObjectStore>,
}

impl GeminiImageGenerator {
    pub fn new(client: GeminiClient, store: Arc<dyn ObjectStore>) -> Self {
        Self { client, store }
    }
}

pub fn illustration_prompt(prompt: &str, theme: &str, with_reference: bool) -> String {
    let reference = if with_reference {
        " USE THE PROVIDED REFERENCE IMAGE to depict the child character faithfully in the \
         illustration. The character should match the appearance shown in the reference image."
    } else {
        ""
    };

    format!(
        "Create a colorful, whimsical, child-friendly illustration for toddlers (ages 2-4) in the \
         style of children's book art. Theme: {}. {}.{} The image should be bright, cheerful, \
         non-scary, with soft shapes and warm colors. Suitable for young children. Never put \
         text in the image.",
        theme, prompt, reference
    )
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<GeneratedImage, GenerationError> {
        let reference = match request.reference_image_url.as_deref() {
            Some(url) => self.client.fetch_reference(url).await,
            None => None,
        };

        let prompt = illustration_prompt(&request.prompt, &request.theme, reference.is_some());

        let bytes = self
            .client
            .generate_image(&prompt, reference.as_ref())
            .await?;

        let path = generated_image_path(&request.user_id, Utc::now());
        let image_url = self.store.put_png(&path, bytes).await?;

        info!(path = %path, "Stored generated illustration");

        Ok(GeneratedImage {
            image_url,
            provider_meta: json!({
                "provider": self.client.model(),
                "prompt": prompt,
                "storagePath": path,
                "referenceAttached": reference.is_some(),
            }),
        })
    }
}
