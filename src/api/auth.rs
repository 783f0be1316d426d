use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::required;
use crate::{auth::authenticate, error::AppError, server::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub id_token: Option<String>,
}

/// POST /auth/verify - Exchange an identity token for the caller's user id
pub async fn verify_token(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body?;
    let token = required(body.id_token, "idToken")?;

    let user_id = authenticate(state.identity.as_ref(), &token).await?;

    Ok(Json(json!({ "userId": user_id })))
}
