pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod mpesa;
pub mod policy;
pub mod services;
pub mod validation;

use axum::{
    Router,
    routing::{get, post},
};

use crate::services::{ListingLifecycle, PaymentService, ReconciliationEngine};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub lifecycle: ListingLifecycle,
    pub payments: PaymentService,
    pub reconciliation: ReconciliationEngine,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/plans", get(handlers::payments::list_plans))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/status",
            post(handlers::payments::poll_payment_status),
        )
        .route("/payments/:id/cancel", post(handlers::payments::cancel_payment))
        .route(
            "/payments/mpesa/callback",
            post(handlers::payments::mpesa_callback),
        )
        .route("/users/:id/quota", get(handlers::users::quota))
        .route("/listings", post(handlers::listings::create_listing))
        .route(
            "/listings/:id",
            get(handlers::listings::get_listing).put(handlers::listings::update_listing),
        )
        .route(
            "/listings/:id/activate",
            post(handlers::listings::activate_listing),
        )
        .route("/listings/:id/sold", post(handlers::listings::mark_sold))
        .route(
            "/listings/:id/reactivate",
            post(handlers::listings::reactivate),
        )
        .route("/listings/:id/suspend", post(handlers::listings::suspend))
        .route(
            "/listings/:id/contact",
            post(handlers::listings::report_contact),
        )
        .with_state(state)
}
