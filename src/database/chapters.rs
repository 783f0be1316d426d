use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{from_micros, to_micros, DbPool};
use crate::error::{AppError, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Generation status of a chapter. The only legal transitions are
/// `generating -> ready` and `generating -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Generating,
    Ready,
    Failed,
}

impl ChapterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterStatus::Generating => "generating",
            ChapterStatus::Ready => "ready",
            ChapterStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChapterStatus::Ready | ChapterStatus::Failed)
    }

    pub const ALL: [ChapterStatus; 3] = [
        ChapterStatus::Generating,
        ChapterStatus::Ready,
        ChapterStatus::Failed,
    ];

    /// Rewriting the current status is a no-op and always allowed
    pub fn can_transition_to(&self, next: ChapterStatus) -> bool {
        *self == next || (*self == ChapterStatus::Generating && next.is_terminal())
    }

    /// Stored statuses from which `next` may be written
    pub fn sources_of(next: ChapterStatus) -> Vec<ChapterStatus> {
        Self::ALL
            .into_iter()
            .filter(|current| current.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "generating" => Ok(ChapterStatus::Generating),
            "ready" => Ok(ChapterStatus::Ready),
            "failed" => Ok(ChapterStatus::Failed),
            _ => Err(anyhow::anyhow!(
                "Invalid chapter status '{}'. Valid options: generating, ready, failed",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterVisibility {
    Private,
    Public,
}

impl ChapterVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterVisibility::Private => "private",
            ChapterVisibility::Public => "public",
        }
    }
}

impl FromStr for ChapterVisibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "private" => Ok(ChapterVisibility::Private),
            "public" => Ok(ChapterVisibility::Public),
            _ => Err(anyhow::anyhow!("Invalid chapter visibility '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub user_id: String,
    pub child_id: String,
    pub theme: String,
    pub seed_text: String,
    pub created_at: DateTime<Utc>,
    pub myth_title: String,
    pub myth_text: String,
    pub tags: Vec<String>,
    pub image_url: String,
    pub provider_meta: Value,
    pub status: ChapterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<ChapterVisibility>,
}

#[derive(Debug, FromRow)]
struct ChapterRow {
    id: String,
    user_id: String,
    child_id: String,
    theme: String,
    seed_text: String,
    created_at: i64,
    myth_title: String,
    myth_text: String,
    tags: String,
    image_url: String,
    provider_meta: String,
    status: String,
    visibility: Option<String>,
}

impl TryFrom<ChapterRow> for Chapter {
    type Error = AppError;

    fn try_from(row: ChapterRow) -> Result<Self> {
        Ok(Chapter {
            tags: serde_json::from_str(&row.tags)?,
            provider_meta: serde_json::from_str(&row.provider_meta)?,
            status: row.status.parse::<ChapterStatus>()?,
            visibility: row.visibility.as_deref().map(str::parse::<ChapterVisibility>)
                .transpose()?,
            created_at: from_micros(row.created_at),
            id: row.id,
            user_id: row.user_id,
            child_id: row.child_id,
            theme: row.theme,
            seed_text: row.seed_text,
            myth_title: row.myth_title,
            myth_text: row.myth_text,
            image_url: row.image_url,
        })
    }
}

/// Reduced projection used by the yearly recap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapItem {
    pub id: String,
    pub myth_title: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub theme: String,
}

#[derive(Debug, Clone)]
pub struct NewChapter {
    pub user_id: String,
    pub child_id: String,
    pub theme: String,
    pub seed_text: String,
    pub created_at: DateTime<Utc>,
    pub visibility: Option<ChapterVisibility>,
}

/// Partial field merge for `Chapter::update`. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ChapterUpdate {
    pub myth_title: Option<String>,
    pub myth_text: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub provider_meta: Option<Value>,
    pub status: Option<ChapterStatus>,
}

impl ChapterUpdate {
    pub fn status(status: ChapterStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.myth_title.is_none()
            && self.myth_text.is_none()
            && self.tags.is_none()
            && self.image_url.is_none()
            && self.provider_meta.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ListChaptersParams {
    pub child_id: String,
    pub page_size: u32,
    pub after: Option<String>,
}

impl ListChaptersParams {
    pub fn new(child_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            after: None,
        }
    }
}

const CHAPTER_COLUMNS: &str = "id, user_id, child_id, theme, seed_text, created_at, myth_title, \
     myth_text, tags, image_url, provider_meta, status, visibility";

fn rows_to_chapters(rows: Vec<ChapterRow>) -> Result<Vec<Chapter>> {
    rows.into_iter().map(Chapter::try_from).collect()
}

impl Chapter {
    /// Insert a chapter in `generating` status with empty generated fields
    pub async fn create(pool: &DbPool, new: NewChapter) -> Result<Chapter> {
        let id = Uuid::new_v4().to_string();
        let query = format!(
            r#"
            INSERT INTO chapters (id, user_id, child_id, theme, seed_text, created_at, status, visibility)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'generating', ?7)
            RETURNING {}
        "#,
            CHAPTER_COLUMNS
        );

        let row = sqlx::query_as::<_, ChapterRow>(&query)
            .bind(&id)
            .bind(&new.user_id)
            .bind(&new.child_id)
            .bind(&new.theme)
            .bind(&new.seed_text)
            .bind(to_micros(new.created_at))
            .bind(new.visibility.map(|v| v.as_str()))
            .fetch_one(pool)
            .await?;

        info!(chapter_id = %id, child_id = %new.child_id, "Created chapter in generating status");
        row.try_into()
    }

    pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Chapter>> {
        let query = format!("SELECT {} FROM chapters WHERE id = ?1", CHAPTER_COLUMNS);
        let row = sqlx::query_as::<_, ChapterRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        row.map(Chapter::try_from).transpose()
    }

    /// Fetch a chapter, failing with `Forbidden` when another user owns it
    pub async fn get_for_user(pool: &DbPool, id: &str, user_id: &str) -> Result<Chapter> {
        let chapter = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chapter '{}' not found", id)))?;

        if chapter.user_id != user_id {
            return Err(AppError::Forbidden(format!(
                "Chapter '{}' belongs to another user",
                id
            )));
        }

        Ok(chapter)
    }

    /// Last-writer-wins partial update. A status write is applied only when the
    /// stored status may transition to it; otherwise `InvalidTransition`.
    pub async fn update(pool: &DbPool, id: &str, update: ChapterUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut set_clauses = Vec::new();
        let mut bind_values: Vec<String> = Vec::new();

        if let Some(title) = update.myth_title {
            set_clauses.push("myth_title = ?");
            bind_values.push(title);
        }
        if let Some(text) = update.myth_text {
            set_clauses.push("myth_text = ?");
            bind_values.push(text);
        }
        if let Some(ref tags) = update.tags {
            set_clauses.push("tags = ?");
            bind_values.push(serde_json::to_string(tags)?);
        }
        if let Some(url) = update.image_url {
            set_clauses.push("image_url = ?");
            bind_values.push(url);
        }
        if let Some(ref meta) = update.provider_meta {
            set_clauses.push("provider_meta = ?");
            bind_values.push(serde_json::to_string(meta)?);
        }
        if let Some(status) = update.status {
            set_clauses.push("status = ?");
            bind_values.push(status.as_str().to_string());
        }

        // The transition guard lives in the WHERE clause so check and write are one statement.
        let sources = update
            .status
            .map(ChapterStatus::sources_of)
            .unwrap_or_default();
        let mut query = format!(
            "UPDATE chapters SET {} WHERE id = ?",
            set_clauses.join(", ")
        );
        if update.status.is_some() {
            query.push_str(&format!(
                " AND status IN ({})",
                vec!["?"; sources.len()].join(", ")
            ));
        }

        let mut query_builder = sqlx::query(&query);
        for value in &bind_values {
            query_builder = query_builder.bind(value);
        }
        query_builder = query_builder.bind(id);
        for source in &sources {
            query_builder = query_builder.bind(source.as_str());
        }

        let result = query_builder.execute(pool).await?;
        if result.rows_affected() > 0 {
            debug!(chapter_id = %id, "Updated chapter fields: {}", set_clauses.join(", "));
            return Ok(());
        }

        match (Self::get_by_id(pool, id).await?, update.status) {
            (None, _) => Err(AppError::NotFound(format!("Chapter '{}' not found", id))),
            (Some(current), Some(next)) => Err(AppError::InvalidTransition {
                from: current.status,
                to: next,
            }),
            (Some(_), None) => Ok(()),
        }
    }

    /// Mark chapters left `generating` by a previous process as `failed`.
    /// Only safe before this process starts forging.
    pub async fn fail_abandoned(pool: &DbPool) -> Result<u64> {
        let result = sqlx::query("UPDATE chapters SET status = 'failed' WHERE status = 'generating'")
            .execute(pool)
            .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!("Marked {} abandoned chapters as failed", count);
        }
        Ok(count)
    }

    /// Owner edit of the generated text; only allowed once the chapter is `ready`
    pub async fn edit_text(
        pool: &DbPool,
        id: &str,
        user_id: &str,
        myth_title: Option<String>,
        myth_text: Option<String>,
    ) -> Result<Chapter> {
        let chapter = Self::get_for_user(pool, id, user_id).await?;

        if chapter.status != ChapterStatus::Ready {
            return Err(AppError::Conflict(format!(
                "Chapter '{}' is {} and cannot be edited",
                id, chapter.status
            )));
        }

        let myth_title = myth_title.map(|t| t.trim().to_string());
        let myth_text = myth_text.map(|t| t.trim().to_string());
        if myth_title.as_deref() == Some("") || myth_text.as_deref() == Some("") {
            return Err(AppError::BadRequest(
                "Title and story cannot be empty".to_string(),
            ));
        }

        Self::update(
            pool,
            id,
            ChapterUpdate {
                myth_title,
                myth_text,
                ..Default::default()
            },
        )
        .await?;

        Self::get_for_user(pool, id, user_id).await
    }

    /// Page through a child's chapters, newest first. `after` is the id of the
    /// last chapter of the previous page; an unknown id restarts from the top.
    pub async fn list(
        pool: &DbPool,
        params: &ListChaptersParams,
        user_id: &str,
    ) -> Result<Vec<Chapter>> {
        let page_size = params.page_size.clamp(1, MAX_PAGE_SIZE) as i64;

        let cursor = match params.after.as_deref() {
            Some(after) => {
                sqlx::query_as::<_, (i64, String)>(
                    "SELECT created_at, id FROM chapters WHERE id = ?1 AND user_id = ?2",
                )
                .bind(after)
                .bind(user_id)
                .fetch_optional(pool)
                .await?
            }
            None => None,
        };

        let rows = match cursor {
            Some((cursor_created_at, cursor_id)) => {
                let query = format!(
                    r#"
                    SELECT {}
                    FROM chapters
                    WHERE user_id = ?1 AND child_id = ?2
                      AND (created_at < ?3 OR (created_at = ?3 AND id < ?4))
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?5
                "#,
                    CHAPTER_COLUMNS
                );
                sqlx::query_as::<_, ChapterRow>(&query)
                    .bind(user_id)
                    .bind(&params.child_id)
                    .bind(cursor_created_at)
                    .bind(cursor_id)
                    .bind(page_size)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                if params.after.is_some() {
                    debug!("Pagination cursor did not resolve, starting from the newest chapter");
                }
                let query = format!(
                    r#"
                    SELECT {}
                    FROM chapters
                    WHERE user_id = ?1 AND child_id = ?2
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?3
                "#,
                    CHAPTER_COLUMNS
                );
                sqlx::query_as::<_, ChapterRow>(&query)
                    .bind(user_id)
                    .bind(&params.child_id)
                    .bind(page_size)
                    .fetch_all(pool)
                    .await?
            }
        };

        rows_to_chapters(rows)
    }

    /// Chapters created during the given UTC calendar year, newest first
    pub async fn list_recap(
        pool: &DbPool,
        child_id: &str,
        year: i32,
        user_id: &str,
    ) -> Result<Vec<RecapItem>> {
        let (start, end) = year_bounds(year)?;

        let rows = sqlx::query_as::<_, (String, String, String, i64, String)>(
            r#"
            SELECT id, myth_title, image_url, created_at, theme
            FROM chapters
            WHERE user_id = ?1 AND child_id = ?2
              AND created_at >= ?3 AND created_at < ?4
            ORDER BY created_at DESC, id DESC
        "#,
        )
        .bind(user_id)
        .bind(child_id)
        .bind(to_micros(start))
        .bind(to_micros(end))
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, myth_title, image_url, created_at, theme)| RecapItem {
                id,
                myth_title,
                image_url,
                created_at: from_micros(created_at),
                theme,
            })
            .collect())
    }
}

/// Half-open `[Jan 1 Y, Jan 1 Y+1)` range, which contains Dec 31 23:59:59 of Y
pub fn year_bounds(year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
    let end = year
        .checked_add(1)
        .and_then(|next| Utc.with_ymd_and_hms(next, 1, 1, 0, 0, 0).single());

    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(AppError::BadRequest(format!("Invalid year {}", year))),
    }
}
