//! Chapter orchestration: placeholder record, myth text, illustration, final write.
//!
//! `begin` validates the request and commits a `generating` chapter;
//! `complete` drives generation and always leaves the chapter `ready` or
//! `failed`. `forge_chapter` runs both in sequence.

pub mod retry;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::chapters::{Chapter, ChapterStatus, ChapterUpdate, NewChapter};
use crate::database::children::Child;
use crate::database::DbPool;
use crate::error::{AppError, Result};
use crate::generation::{
    GeneratedImage, GeneratedMyth, GenerationError, ImageGenerator, ImageRequest, MythRequest,
    TextGenerator,
};

pub use retry::RetryPolicy;

pub const MAX_SEED_CHARS: usize = 160;
pub const DEFAULT_AGE_MONTHS: i32 = 36;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeRequest {
    #[serde(default)]
    pub child_id: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub seed_text: String,
}

impl ForgeRequest {
    pub fn new(child_id: &str, theme: &str, seed_text: &str) -> Self {
        Self {
            child_id: child_id.to_string(),
            theme: theme.to_string(),
            seed_text: seed_text.to_string(),
        }
    }

    fn validated(&self) -> Result<ForgeRequest> {
        let child_id = self.child_id.trim();
        let theme = self.theme.trim();
        let seed_text = self.seed_text.trim();

        if child_id.is_empty() || theme.is_empty() || seed_text.is_empty() {
            return Err(AppError::BadRequest(
                "Missing required fields: childId, theme and seedText".to_string(),
            ));
        }

        if seed_text.chars().count() > MAX_SEED_CHARS {
            return Err(AppError::BadRequest(format!(
                "Seed text must be at most {} characters",
                MAX_SEED_CHARS
            )));
        }

        Ok(ForgeRequest::new(child_id, theme, seed_text))
    }
}

/// A committed `generating` chapter together with the context needed to finish it
#[derive(Debug, Clone)]
pub struct PendingChapter {
    pub chapter: Chapter,
    pub child: Child,
    pub age_months: i32,
}

/// `(years * 12) + months` between the birth date and `today`; 36 when the
/// birth date is absent or unparseable
pub fn age_in_months(birth_date: Option<&str>, today: NaiveDate) -> i32 {
    let Some(raw) = birth_date else {
        return DEFAULT_AGE_MONTHS;
    };

    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(birth) => {
            (today.year() - birth.year()) * 12 + (today.month() as i32 - birth.month() as i32)
        }
        Err(_) => {
            warn!(birth_date = %raw, "Unparseable birth date, using default age");
            DEFAULT_AGE_MONTHS
        }
    }
}

#[derive(Clone)]
pub struct ChapterForge {
    db: DbPool,
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    retry: RetryPolicy,
}

impl ChapterForge {
    pub fn new(db: DbPool, text: Arc<dyn TextGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self {
            db,
            text,
            images,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate, resolve the child, then commit a `generating` chapter
    pub async fn begin(&self, request: &ForgeRequest, user_id: &str) -> Result<PendingChapter> {
        let request = request.validated()?;

        let child = Child::get_for_user(&self.db, &request.child_id, user_id).await?;
        let age_months = age_in_months(child.birth_date.as_deref(), Utc::now().date_naive());

        let chapter = Chapter::create(
            &self.db,
            NewChapter {
                user_id: user_id.to_string(),
                child_id: child.id.clone(),
                theme: request.theme,
                seed_text: request.seed_text,
                created_at: Utc::now(),
                visibility: None,
            },
        )
        .await?;

        info!(
            chapter_id = %chapter.id,
            child_id = %child.id,
            age_months,
            "Forging chapter"
        );

        Ok(PendingChapter {
            chapter,
            child,
            age_months,
        })
    }

    /// Run text and image generation and write the terminal status
    pub async fn complete(&self, pending: PendingChapter) -> Result<Chapter> {
        let chapter_id = pending.chapter.id.clone();

        let (myth, image) = match self.generate(&pending).await {
            Ok(generated) => generated,
            Err(e) => {
                error!(
                    chapter_id = %chapter_id,
                    kind = e.kind(),
                    "Chapter generation failed: {}",
                    e
                );
                self.mark_failed(&chapter_id).await;
                return Err(e.into());
            }
        };

        let provider_meta = json!({
            "text": myth.provider_meta,
            "image": image.provider_meta,
        });

        let update = ChapterUpdate {
            myth_title: Some(myth.myth.title.clone()),
            myth_text: Some(myth.myth.story.clone()),
            tags: Some(myth.myth.tags.clone()),
            image_url: Some(image.image_url.clone()),
            provider_meta: Some(provider_meta.clone()),
            status: Some(ChapterStatus::Ready),
        };

        if let Err(e) = Chapter::update(&self.db, &chapter_id, update).await {
            error!(chapter_id = %chapter_id, "Failed to store generated chapter: {}", e);
            self.mark_failed(&chapter_id).await;
            return Err(e);
        }

        info!(chapter_id = %chapter_id, title = %myth.myth.title, "Chapter ready");

        Ok(Chapter {
            myth_title: myth.myth.title,
            myth_text: myth.myth.story,
            tags: myth.myth.tags,
            image_url: image.image_url,
            provider_meta,
            status: ChapterStatus::Ready,
            ..pending.chapter
        })
    }

    pub async fn forge_chapter(&self, request: &ForgeRequest, user_id: &str) -> Result<Chapter> {
        let pending = self.begin(request, user_id).await?;
        self.complete(pending).await
    }

    async fn generate(
        &self,
        pending: &PendingChapter,
    ) -> std::result::Result<(GeneratedMyth, GeneratedImage), GenerationError> {
        let chapter = &pending.chapter;
        let child = &pending.child;

        let myth_request = MythRequest {
            seed_text: chapter.seed_text.clone(),
            theme: chapter.theme.clone(),
            child_age_months: pending.age_months,
            child_name: child.name.clone(),
            child_description: child.description.clone(),
            child_context: child.context.clone(),
        };

        let myth = self
            .retry
            .run("text", || self.text.generate_myth(&myth_request))
            .await?;

        info!(chapter_id = %chapter.id, "Myth text generated");

        let image_request = ImageRequest {
            user_id: chapter.user_id.clone(),
            prompt: format!("{}: {}", chapter.theme, myth.myth.title),
            theme: chapter.theme.clone(),
            reference_image_url: child.avatar_url.clone(),
        };

        let image = self
            .retry
            .run("image", || self.images.generate_image(&image_request))
            .await?;

        info!(chapter_id = %chapter.id, image_url = %image.image_url, "Illustration generated");

        Ok((myth, image))
    }

    /// Record the failure; a store error here is logged, never surfaced
    async fn mark_failed(&self, chapter_id: &str) {
        if let Err(e) =
            Chapter::update(&self.db, chapter_id, ChapterUpdate::status(ChapterStatus::Failed))
                .await
        {
            error!(chapter_id = %chapter_id, "Failed to mark chapter as failed: {}", e);
        }
    }
}
