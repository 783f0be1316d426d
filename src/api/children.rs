use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::hide_foreign;
use crate::{
    auth::AuthUser,
    database::children::{Child, UpsertChildRequest},
    error::AppError,
    forge::age_in_months,
    generation::{AvatarRequest, GenerationError, InlineImage, ProviderError},
    server::AppState,
};

const DEFAULT_PHOTO_MIME: &str = "image/jpeg";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarBody {
    pub photo_base64: Option<String>,
    pub photo_mime_type: Option<String>,
    pub description: Option<String>,
}

/// GET /children - The caller's child profiles, newest first
pub async fn list_children(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Child>>, AppError> {
    let children = Child::list_by_user(&state.db, &user.user_id).await?;
    Ok(Json(children))
}

/// POST /children - Create a profile, or update one when `id` is given
pub async fn upsert_child(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<UpsertChildRequest>, JsonRejection>,
) -> Result<Json<Child>, AppError> {
    let Json(request) = body?;
    let child = Child::upsert(&state.db, request, &user.user_id).await?;
    Ok(Json(child))
}

/// GET /children/:child_id
pub async fn get_child(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
) -> Result<Json<Child>, AppError> {
    let child = Child::get_for_user(&state.db, &child_id, &user.user_id)
        .await
        .map_err(hide_foreign)?;
    Ok(Json(child))
}

fn decode_photo(body: &AvatarBody) -> Result<Option<InlineImage>, AppError> {
    let Some(encoded) = body.photo_base64.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Ok(None);
    };

    // Accept data URLs as produced by browser file readers
    let encoded = encoded
        .split_once("base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);

    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::BadRequest("photoBase64 is not valid base64".to_string()))?;

    let mime_type = body
        .photo_mime_type
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_PHOTO_MIME);

    if !mime_type.starts_with("image/") {
        return Err(AppError::BadRequest(format!(
            "Unsupported photo type '{}'",
            mime_type
        )));
    }

    Ok(Some(InlineImage {
        mime_type: mime_type.to_string(),
        data,
    }))
}

/// POST /children/:child_id/avatar - Generate a storybook avatar from a photo
/// and/or description and attach it to the profile
pub async fn generate_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
    body: Result<Json<AvatarBody>, JsonRejection>,
) -> Result<Json<Child>, AppError> {
    let Json(body) = body?;

    let child = Child::get_for_user(&state.db, &child_id, &user.user_id).await?;
    let photo = decode_photo(&body)?;

    let generator = state.avatars.as_ref().ok_or(GenerationError::Provider(
        ProviderError::NotConfigured("avatar generation"),
    ))?;

    let description = body
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .or_else(|| child.description.clone());

    let request = AvatarRequest {
        user_id: user.user_id.clone(),
        child_name: child.name.clone(),
        child_age_months: child
            .birth_date
            .as_deref()
            .map(|date| age_in_months(Some(date), Utc::now().date_naive())),
        description,
        photo,
    };

    let avatar = generator.generate_avatar(&request).await?;
    Child::set_avatar_url(&state.db, &child.id, &avatar.image_url).await?;

    info!(child_id = %child.id, "Avatar updated");

    Ok(Json(Child {
        avatar_url: Some(avatar.image_url),
        ..child
    }))
}
