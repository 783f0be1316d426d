use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;
use crate::database::chapters::ChapterStatus;
use crate::generation::GenerationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Chapter status cannot move from {from} to {to}")]
    InvalidTransition {
        from: ChapterStatus,
        to: ChapterStatus,
    },

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Json(_)
            | AppError::Internal(_)
            | AppError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures are logged in full; callers only see a generic message.
        let error_message = match self {
            AppError::Generation(ref err) => {
                error!("Chapter generation failed: {}", err);
                "Failed to generate content".to_string()
            }
            AppError::Database(ref err) => {
                error!("Database error: {}", err);
                "Database error".to_string()
            }
            AppError::Internal(ref err) => {
                error!("Internal error: {:#}", err);
                "Internal server error".to_string()
            }
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::Json(ref err) => {
                error!("Stored JSON could not be decoded: {}", err);
                "Internal server error".to_string()
            }
            AppError::BadRequest(ref message)
            | AppError::Forbidden(ref message)
            | AppError::NotFound(ref message)
            | AppError::Conflict(ref message) => message.clone(),
            AppError::InvalidTransition { .. } => self.to_string(),
        };

        let body = json!({
            "error": error_message
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rej: JsonRejection) -> Self {
        AppError::BadRequest(rej.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rej: QueryRejection) -> Self {
        AppError::BadRequest(rej.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
