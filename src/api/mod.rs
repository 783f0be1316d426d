pub mod auth;
pub mod chapters;
pub mod children;
pub mod recaps;

use axum::{
    routing::{get, post},
    Router,
};

use crate::error::AppError;
use crate::server::AppState;

/// Create the API router with all endpoint routes
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/auth/verify", post(auth::verify_token))
        .route(
            "/children",
            get(children::list_children).post(children::upsert_child),
        )
        .route("/children/:child_id", get(children::get_child))
        .route("/children/:child_id/avatar", post(children::generate_avatar))
        .route(
            "/chapters",
            get(chapters::list_chapters).post(chapters::create_chapter),
        )
        .route(
            "/chapters/:chapter_id",
            get(chapters::get_chapter).patch(chapters::edit_chapter),
        )
        .route("/recaps", get(recaps::get_recap))
}

/// Reads of a foreign record answer 404 so other users' ids are not confirmed
pub(crate) fn hide_foreign(err: AppError) -> AppError {
    match err {
        AppError::Forbidden(_) => AppError::NotFound("Not found".to_string()),
        other => other,
    }
}

/// Require a non-blank query or body field
pub(crate) fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing required parameter: {}", name)))
}
