use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{GeneratedImage, GenerationError, ImageGenerator, ImageRequest};

/// Curated themes and the stock illustration used for each when no image
/// provider is configured
pub const THEMES: &[(&str, &str)] = &[
    ("Fantasy", "https://images.unsplash.com/photo-1518709268805-4e9042af9f23?w=800&h=600&fit=crop"),
    ("Epic", "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=800&h=600&fit=crop"),
    ("Space Adventure", "https://images.unsplash.com/photo-1419242902214-272b3f66ee7a?w=800&h=600&fit=crop"),
    ("Forest Friends", "https://images.unsplash.com/photo-1441974231531-c6227db76b6e?w=800&h=600&fit=crop"),
    ("Ocean Wonders", "https://images.unsplash.com/photo-1559827260-dc66d52bef19?w=800&h=600&fit=crop"),
    ("Dinosaur Time", "https://images.unsplash.com/photo-1598398329016-a76c6bd0e5a9?w=800&h=600&fit=crop"),
    ("Kind Robots", "https://images.unsplash.com/photo-1563207153-f403bf289096?w=800&h=600&fit=crop"),
    ("Magic School", "https://images.unsplash.com/photo-1456513080510-7bf3a84b82f8?w=800&h=600&fit=crop"),
    ("Fairy Garden", "https://images.unsplash.com/photo-1490750967868-88aa4486c946?w=800&h=600&fit=crop"),
    ("Friendly Monsters", "https://images.unsplash.com/photo-1574169208507-84376144848b?w=800&h=600&fit=crop"),
    ("Pirate Islands", "https://images.unsplash.com/photo-1559827260-dc66d52bef19?w=800&h=600&fit=crop"),
    ("Snowy World", "https://images.unsplash.com/photo-1491002052546-bf38f186af56?w=800&h=600&fit=crop"),
    ("City Explorers", "https://images.unsplash.com/photo-1477959858617-67f85cf4f1df?w=800&h=600&fit=crop"),
    ("Cozy Bedtime", "https://images.unsplash.com/photo-1536300007881-7e482242baa5?w=800&h=600&fit=crop"),
];

pub const DEFAULT_PLACEHOLDER: &str =
    "https://images.unsplash.com/photo-1507003211169-0a1dd7228f2d?w=800&h=600&fit=crop";

pub fn placeholder_url(theme: &str) -> &'static str {
    THEMES
        .iter()
        .find(|(name, _)| *name == theme)
        .map(|(_, url)| *url)
        .unwrap_or(DEFAULT_PLACEHOLDER)
}

pub fn is_curated_theme(theme: &str) -> bool {
    THEMES.iter().any(|(name, _)| *name == theme)
}

/// Stand-in illustrator used when no image provider key is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderImageGenerator;

#[async_trait]
impl ImageGenerator for PlaceholderImageGenerator {
    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<GeneratedImage, GenerationError> {
        debug!(theme = %request.theme, "Using placeholder illustration");

        Ok(GeneratedImage {
            image_url: placeholder_url(&request.theme).to_string(),
            provider_meta: json!({
                "type": "placeholder",
                "theme": request.theme,
            }),
        })
    }
}
