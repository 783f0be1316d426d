use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use serde::Deserialize;

use super::required;
use crate::{
    auth::AuthUser,
    database::chapters::{Chapter, RecapItem},
    error::AppError,
    server::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapQuery {
    pub child_id: Option<String>,
    pub year: Option<String>,
}

/// GET /recaps?childId=&year= - A child's chapters for one calendar year
pub async fn get_recap(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<RecapQuery>, QueryRejection>,
) -> Result<Json<Vec<RecapItem>>, AppError> {
    let Query(query) = query?;

    let child_id = required(query.child_id, "childId")?;
    let year = required(query.year, "year")?;
    let year: i32 = year
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid year '{}'", year)))?;

    let items = Chapter::list_recap(&state.db, &child_id, year, &user.user_id).await?;
    Ok(Json(items))
}
