use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::db::queries;
use crate::error::AppError;
use crate::policy;

/// Free-ad quota snapshot for a seller. Advisory only: the authoritative
/// check is the atomic conditional increment at listing creation.
pub async fn quota(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = queries::get_user(&state.db, id).await.map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("user {} not found", id)),
        other => AppError::Database(other),
    })?;

    Ok(Json(json!({
        "free_ads_used": user.free_ads_used,
        "free_ads_limit": policy::FREE_ADS_LIMIT,
        "remaining_free_ads": policy::remaining_free_ads(user.free_ads_used),
        "can_post_free_ad": policy::can_post_free_ad(user.free_ads_used),
    })))
}
