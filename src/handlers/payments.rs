use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::handlers::user_id_from_headers;
use crate::policy;
use crate::services::payment::NewPayment;

/// Premium plan table, as shown to clients choosing an upgrade.
pub async fn list_plans() -> impl IntoResponse {
    let plans: Vec<_> = policy::PREMIUM_PLANS
        .iter()
        .map(|(days, price)| {
            let popular = [7, 15].contains(days);
            json!({
                "days": days,
                "price": price,
                "currency": "KES",
                "popular": popular,
            })
        })
        .collect();

    Json(plans)
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: BigDecimal,
    pub premium_days: i32,
    pub phone_number: String,
    pub listing_id: Option<Uuid>,
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from_headers(&headers)?;

    let payment = state
        .payments
        .create(
            user_id,
            NewPayment {
                amount: request.amount,
                premium_days: request.premium_days,
                phone_number: request.phone_number,
                listing_id: request.listing_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    let payment = state.payments.get_for_user(id, user_id).await?;

    Ok(Json(payment))
}

/// Fallback reconciliation when no callback has arrived: poll the gateway and
/// apply the outcome through the same idempotent entry points.
pub async fn poll_payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    let payment = state.payments.poll_status(id, user_id).await?;

    Ok(Json(json!({
        "payment_status": payment.status,
        "payment": payment,
    })))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from_headers(&headers)?;
    let payment = state.payments.cancel(id, user_id).await?;

    Ok(Json(json!({
        "message": "payment cancelled",
        "payment": payment,
    })))
}

/// The asynchronous gateway boundary. 200 on successful processing or on
/// quarantine of an unmatched callback; 4xx only on parse failure so the
/// provider retries delivery. Takes the raw body so even a non-JSON payload
/// is persisted for audit before rejection.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, AppError> {
    state.reconciliation.process_raw(&body).await?;

    Ok((StatusCode::OK, "OK"))
}
