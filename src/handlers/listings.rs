use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::db::queries;
use crate::error::AppError;
use crate::handlers::user_id_from_headers;
use crate::services::lifecycle::{Engagement, NewListing};

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub category: String,
    pub condition: String,
    pub location: String,
    pub delivery_option: String,
    pub original_price: Option<BigDecimal>,
    pub discount_percentage: Option<i32>,
}

pub async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let seller_id = user_id_from_headers(&headers)?;

    let listing = state
        .lifecycle
        .create_free(
            seller_id,
            NewListing {
                title: request.title,
                description: request.description,
                price: request.price,
                category: request.category,
                condition: request.condition,
                location: request.location,
                delivery_option: request.delivery_option,
                original_price: request.original_price,
                discount_percentage: request.discount_percentage,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn update_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let seller_id = user_id_from_headers(&headers)?;

    let listing = state
        .lifecycle
        .edit(
            id,
            seller_id,
            NewListing {
                title: request.title,
                description: request.description,
                price: request.price,
                category: request.category,
                condition: request.condition,
                location: request.location,
                delivery_option: request.delivery_option,
                original_price: request.original_price,
                discount_percentage: request.discount_percentage,
            },
        )
        .await?;

    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
pub struct ViewParams {
    #[serde(default)]
    pub unique: bool,
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ViewParams>,
) -> Result<impl IntoResponse, AppError> {
    let listing = queries::get_listing(&state.db, id).await.map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("listing {} not found", id)),
        other => AppError::Database(other),
    })?;

    state
        .lifecycle
        .report_engagement(id, Engagement::View {
            unique: params.unique,
        })
        .await?;

    Ok(Json(listing))
}

pub async fn activate_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let seller_id = user_id_from_headers(&headers)?;
    let listing = queries::get_listing(&state.db, id).await.map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("listing {} not found", id)),
        other => AppError::Database(other),
    })?;
    if listing.seller_id != seller_id {
        return Err(AppError::NotOwner(
            "only the seller can publish a listing".to_string(),
        ));
    }

    let listing = state.lifecycle.activate(id).await?;
    Ok(Json(listing))
}

pub async fn mark_sold(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let seller_id = user_id_from_headers(&headers)?;
    state.lifecycle.mark_sold(id, seller_id).await?;

    Ok(Json(serde_json::json!({ "message": "listing marked as sold" })))
}

pub async fn reactivate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let seller_id = user_id_from_headers(&headers)?;
    state.lifecycle.reactivate(id, seller_id).await?;

    Ok(Json(serde_json::json!({ "message": "listing reactivated" })))
}

/// Admin takedown. Terminal; no ownership check, the admin surface in front
/// of this service decides who may call it.
pub async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.lifecycle.suspend(id).await?;

    Ok(Json(serde_json::json!({ "message": "listing suspended" })))
}

pub async fn report_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .lifecycle
        .report_engagement(id, Engagement::Contact)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
