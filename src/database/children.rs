use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use super::{from_micros, to_micros, DbPool};
use crate::error::{AppError, Result};

pub const MAX_DESCRIPTION_CHARS: usize = 200;
pub const MAX_CONTEXT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ChildRow {
    id: String,
    user_id: String,
    name: String,
    birth_date: Option<String>,
    description: Option<String>,
    context: Option<String>,
    avatar_url: Option<String>,
    created_at: i64,
}

impl From<ChildRow> for Child {
    fn from(row: ChildRow) -> Self {
        Child {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            birth_date: row.birth_date,
            description: row.description,
            context: row.context,
            avatar_url: row.avatar_url,
            created_at: from_micros(row.created_at),
        }
    }
}

/// Create-or-update payload for a child profile. `id` selects update mode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertChildRequest {
    pub id: Option<String>,
    pub name: String,
    pub birth_date: Option<String>,
    pub description: Option<String>,
    pub context: Option<String>,
    pub avatar_url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl UpsertChildRequest {
    /// Trim fields, turn blank optionals into `None` and enforce length limits
    pub fn normalized(self) -> Result<UpsertChildRequest> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest("Child name is required".to_string()));
        }

        let birth_date = non_blank(self.birth_date);
        if let Some(ref date) = birth_date {
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                return Err(AppError::BadRequest(format!(
                    "Invalid birth date '{}', expected YYYY-MM-DD",
                    date
                )));
            }
        }

        let description = non_blank(self.description);
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(AppError::BadRequest(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        let context = non_blank(self.context);
        if context
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_CONTEXT_CHARS)
        {
            return Err(AppError::BadRequest(format!(
                "Family context must be at most {} characters",
                MAX_CONTEXT_CHARS
            )));
        }

        Ok(UpsertChildRequest {
            id: non_blank(self.id),
            name,
            birth_date,
            description,
            context,
            avatar_url: non_blank(self.avatar_url),
        })
    }
}

const CHILD_COLUMNS: &str =
    "id, user_id, name, birth_date, description, context, avatar_url, created_at";

impl Child {
    pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Child>> {
        let query = format!("SELECT {} FROM children WHERE id = ?1", CHILD_COLUMNS);
        let row = sqlx::query_as::<_, ChildRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row.map(Child::from))
    }

    /// Fetch a child and confirm the caller owns it
    pub async fn get_for_user(pool: &DbPool, id: &str, user_id: &str) -> Result<Child> {
        let child = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Child '{}' not found", id)))?;

        if child.user_id != user_id {
            return Err(AppError::Forbidden(format!(
                "Child '{}' belongs to another user",
                id
            )));
        }

        Ok(child)
    }

    pub async fn upsert(pool: &DbPool, req: UpsertChildRequest, user_id: &str) -> Result<Child> {
        let req = req.normalized()?;

        match req.id.clone() {
            Some(id) => Self::update(pool, &id, req, user_id).await,
            None => Self::create(pool, req, user_id).await,
        }
    }

    async fn create(pool: &DbPool, req: UpsertChildRequest, user_id: &str) -> Result<Child> {
        let id = Uuid::new_v4().to_string();
        let query = format!(
            r#"
            INSERT INTO children (id, user_id, name, birth_date, description, context, avatar_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING {}
        "#,
            CHILD_COLUMNS
        );

        let row = sqlx::query_as::<_, ChildRow>(&query)
            .bind(&id)
            .bind(user_id)
            .bind(&req.name)
            .bind(&req.birth_date)
            .bind(&req.description)
            .bind(&req.context)
            .bind(&req.avatar_url)
            .bind(to_micros(Utc::now()))
            .fetch_one(pool)
            .await?;

        info!(child_id = %id, user_id = %user_id, "Created child profile");
        Ok(row.into())
    }

    async fn update(
        pool: &DbPool,
        id: &str,
        req: UpsertChildRequest,
        user_id: &str,
    ) -> Result<Child> {
        // Ownership is checked before the write; a missing record is never created here.
        let existing = Self::get_for_user(pool, id, user_id).await?;

        let query = format!(
            r#"
            UPDATE children
            SET name = ?1, birth_date = ?2, description = ?3, context = ?4, avatar_url = ?5
            WHERE id = ?6
            RETURNING {}
        "#,
            CHILD_COLUMNS
        );

        let row = sqlx::query_as::<_, ChildRow>(&query)
            .bind(&req.name)
            .bind(&req.birth_date)
            .bind(&req.description)
            .bind(&req.context)
            .bind(req.avatar_url.or(existing.avatar_url))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Child '{}' not found", id)))?;

        debug!(child_id = %id, "Updated child profile");
        Ok(row.into())
    }

    pub async fn list_by_user(pool: &DbPool, user_id: &str) -> Result<Vec<Child>> {
        let query = format!(
            r#"
            SELECT {}
            FROM children
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
        "#,
            CHILD_COLUMNS
        );

        let rows = sqlx::query_as::<_, ChildRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(Child::from).collect())
    }

    pub async fn set_avatar_url(pool: &DbPool, id: &str, avatar_url: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE children SET avatar_url = ?1 WHERE id = ?2")
            .bind(avatar_url)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
