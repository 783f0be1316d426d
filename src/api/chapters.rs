use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{hide_foreign, required};
use crate::{
    auth::AuthUser,
    database::chapters::{Chapter, ListChaptersParams, DEFAULT_PAGE_SIZE},
    error::AppError,
    forge::ForgeRequest,
    server::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateChapterQuery {
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChaptersQuery {
    pub child_id: Option<String>,
    pub page_size: Option<u32>,
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditChapterRequest {
    pub myth_title: Option<String>,
    pub myth_text: Option<String>,
}

/// POST /chapters - Forge a chapter for one of the caller's children.
/// With `?background=true` the `generating` chapter is returned immediately.
pub async fn create_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<CreateChapterQuery>, QueryRejection>,
    body: Result<Json<ForgeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let Json(request) = body?;

    if !query.background {
        let chapter = state.forge.forge_chapter(&request, &user.user_id).await?;
        return Ok((StatusCode::OK, Json(chapter)).into_response());
    }

    let pending = state.forge.begin(&request, &user.user_id).await?;
    let chapter = pending.chapter.clone();

    let forge = state.forge.clone();
    tokio::spawn(async move {
        let chapter_id = pending.chapter.id.clone();
        if let Err(e) = forge.complete(pending).await {
            warn!(chapter_id = %chapter_id, "Background chapter generation failed: {}", e);
        }
    });

    info!(chapter_id = %chapter.id, "Chapter generation continues in background");
    Ok((StatusCode::ACCEPTED, Json(chapter)).into_response())
}

/// GET /chapters?childId=&pageSize=&after= - Page through a child's chapters
pub async fn list_chapters(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<ListChaptersQuery>, QueryRejection>,
) -> Result<Json<Vec<Chapter>>, AppError> {
    let Query(query) = query?;

    let params = ListChaptersParams {
        child_id: required(query.child_id, "childId")?,
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        after: query.after.filter(|a| !a.trim().is_empty()),
    };

    let chapters = Chapter::list(&state.db, &params, &user.user_id).await?;
    Ok(Json(chapters))
}

/// GET /chapters/:chapter_id - Fetch a chapter the caller owns
pub async fn get_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chapter_id): Path<String>,
) -> Result<Json<Chapter>, AppError> {
    let chapter = Chapter::get_for_user(&state.db, &chapter_id, &user.user_id)
        .await
        .map_err(hide_foreign)?;

    Ok(Json(chapter))
}

/// PATCH /chapters/:chapter_id - Edit the title or story of a ready chapter
pub async fn edit_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chapter_id): Path<String>,
    body: Result<Json<EditChapterRequest>, JsonRejection>,
) -> Result<Json<Chapter>, AppError> {
    let Json(body) = body?;

    if body.myth_title.is_none() && body.myth_text.is_none() {
        return Err(AppError::BadRequest(
            "Nothing to update: provide mythTitle or mythText".to_string(),
        ));
    }

    let chapter = Chapter::edit_text(
        &state.db,
        &chapter_id,
        &user.user_id,
        body.myth_title,
        body.myth_text,
    )
    .await
    .map_err(hide_foreign)?;

    Ok(Json(chapter))
}
