//! Postgres integration tests. Ignored by default; run with a migrated
//! database:
//!
//!   DATABASE_URL=postgres://... cargo test -- --ignored

use bigdecimal::BigDecimal;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use soko_core::db::queries;
use soko_core::error::AppError;
use soko_core::policy;
use soko_core::services::lifecycle::{ListingLifecycle, NewListing};
use soko_core::services::reconciliation::{CallbackDisposition, ReconciliationEngine};
use soko_core::services::Notifier;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("connect to test database");

    sqlx::migrate::Migrator::new(std::path::Path::new("./migrations"))
        .await
        .expect("load migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    pool
}

async fn seed_user(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, full_name, phone_number) VALUES ($1, $2, $3)")
        .bind(id)
        .bind("Test Seller")
        .bind("254712345678")
        .execute(pool)
        .await
        .expect("seed user");
    id
}

fn sample_listing(title: &str) -> NewListing {
    NewListing {
        title: title.to_string(),
        description: "Three-seater, barely used".to_string(),
        price: BigDecimal::from(5000),
        category: "home-garden".to_string(),
        condition: "good".to_string(),
        location: "Nairobi".to_string(),
        delivery_option: "pickup_only".to_string(),
        original_price: None,
        discount_percentage: None,
    }
}

#[tokio::test]
#[ignore]
async fn free_ad_quota_is_atomic_under_concurrency() {
    let pool = test_pool().await;
    let seller = seed_user(&pool).await;
    let lifecycle = ListingLifecycle::new(pool.clone(), Notifier::new());

    let mut handles = Vec::new();
    for i in 0..10 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .create_free(seller, sample_listing(&format!("Sofa {}", i)))
                .await
        }));
    }

    let mut created = 0;
    let mut quota_rejections = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => created += 1,
            Err(AppError::QuotaExceeded(_)) => quota_rejections += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(created, policy::FREE_ADS_LIMIT);
    assert_eq!(quota_rejections, 10 - policy::FREE_ADS_LIMIT);

    let used: i32 = sqlx::query_scalar("SELECT free_ads_used FROM users WHERE id = $1")
        .bind(seller)
        .fetch_one(&pool)
        .await
        .expect("read quota");
    assert_eq!(used, policy::FREE_ADS_LIMIT);
}

#[tokio::test]
#[ignore]
async fn callback_replay_completes_payment_exactly_once() {
    let pool = test_pool().await;
    let user = seed_user(&pool).await;
    let lifecycle = ListingLifecycle::new(pool.clone(), Notifier::new());
    let engine = ReconciliationEngine::new(pool.clone(), Notifier::new());

    let listing = lifecycle
        .create_free(user, sample_listing("Upgradeable sofa"))
        .await
        .expect("create listing");

    let payment = soko_core::db::models::Payment::new(
        user,
        BigDecimal::from(200),
        7,
        "254712345678".to_string(),
        Some(listing.id),
        "7 days premium".to_string(),
    );
    let payment = queries::insert_payment(&pool, &payment)
        .await
        .expect("insert payment");

    let checkout_request_id = format!("ws_CO_{}", Uuid::new_v4().simple());
    assert!(
        queries::mark_payment_processing(&pool, payment.id, &checkout_request_id)
            .await
            .expect("mark processing")
    );

    let callback = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 200.00},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "TransactionDate", "Value": 20260825143522u64},
                        {"Name": "PhoneNumber", "Value": 254712345678u64}
                    ]
                }
            }
        }
    });

    let first = engine
        .process_callback(callback.clone())
        .await
        .expect("first delivery");
    assert_eq!(first, CallbackDisposition::Processed);
    let after_first_delivery = queries::get_listing(&pool, listing.id)
        .await
        .expect("reload listing");
    assert!(after_first_delivery.is_premium);

    // The provider redelivers; the replay must be a no-op.
    let second = engine
        .process_callback(callback)
        .await
        .expect("second delivery");
    assert_eq!(second, CallbackDisposition::Processed);

    let payment = queries::get_payment(&pool, payment.id)
        .await
        .expect("reload payment");
    assert_eq!(payment.status, "completed");
    assert_eq!(payment.receipt_number.as_deref(), Some("NLJ7RT61SV"));
    assert!(payment.completed_at.is_some());

    let listing = queries::get_listing(&pool, listing.id)
        .await
        .expect("reload listing");
    assert!(listing.is_premium);
    // The replay must not have re-applied the premium window.
    assert_eq!(listing.expires_at, after_first_delivery.expires_at);

    let gateway_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM mpesa_transactions WHERE checkout_request_id = $1",
    )
    .bind(&checkout_request_id)
    .fetch_one(&pool)
    .await
    .expect("count gateway records");
    assert_eq!(gateway_rows, 1);
}

#[tokio::test]
#[ignore]
async fn unmatched_callback_is_quarantined() {
    let pool = test_pool().await;
    let engine = ReconciliationEngine::new(pool.clone(), Notifier::new());

    let checkout_request_id = format!("ws_CO_{}", Uuid::new_v4().simple());
    let callback = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully."
            }
        }
    });

    let disposition = engine
        .process_callback(callback)
        .await
        .expect("quarantined, not an error");
    assert_eq!(disposition, CallbackDisposition::Quarantined);

    let (processed, error_message): (bool, String) = sqlx::query_as(
        "SELECT processed, error_message FROM payment_webhooks \
         WHERE data -> 'Body' -> 'stkCallback' ->> 'CheckoutRequestID' = $1",
    )
    .bind(&checkout_request_id)
    .fetch_one(&pool)
    .await
    .expect("webhook row exists");

    assert!(!processed);
    assert_eq!(error_message, "no matching payment");
}

#[tokio::test]
#[ignore]
async fn expiry_sweep_is_idempotent_and_reactivation_requires_premium() {
    let pool = test_pool().await;
    let seller = seed_user(&pool).await;
    let lifecycle = ListingLifecycle::new(pool.clone(), Notifier::new());

    let listing = lifecycle
        .create_free(seller, sample_listing("Fading sofa"))
        .await
        .expect("create listing");

    // Push the free-tier window into the past.
    sqlx::query("UPDATE listings SET expires_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(listing.id)
        .execute(&pool)
        .await
        .expect("age listing");

    let expired = lifecycle.expire_due(chrono::Utc::now()).await.expect("sweep");
    assert_eq!(expired, 1);
    let reloaded = queries::get_listing(&pool, listing.id)
        .await
        .expect("reload listing");
    assert_eq!(reloaded.status, "expired");

    // A repeated sweep finds nothing left to expire.
    let expired_again = lifecycle.expire_due(chrono::Utc::now()).await.expect("sweep");
    assert_eq!(expired_again, 0);

    // Non-premium listings stay expired.
    let refused = lifecycle.reactivate(listing.id, seller).await;
    assert!(matches!(refused, Err(AppError::InvalidTransition(_))));

    // After a premium upgrade the seller can bring it back.
    lifecycle
        .make_premium(listing.id, 7)
        .await
        .expect("premium upgrade");
    lifecycle
        .reactivate(listing.id, seller)
        .await
        .expect("reactivate premium listing");

    let reloaded = queries::get_listing(&pool, listing.id)
        .await
        .expect("reload listing");
    assert_eq!(reloaded.status, "active");
    assert!(reloaded.is_premium);
}

#[tokio::test]
#[ignore]
async fn content_edit_window_closes_with_terminal_status() {
    let pool = test_pool().await;
    let seller = seed_user(&pool).await;
    let lifecycle = ListingLifecycle::new(pool.clone(), Notifier::new());

    let mut listing = lifecycle
        .create_free(seller, sample_listing("Sold sofa"))
        .await
        .expect("create listing");

    lifecycle
        .mark_sold(listing.id, seller)
        .await
        .expect("mark sold");

    // The guarded UPDATE refuses once the listing left draft/active, even if
    // a caller raced past the status read.
    listing.title = "Renamed after sale".to_string();
    let updated = queries::update_listing_content(&pool, &listing)
        .await
        .expect("query runs");
    assert!(updated.is_none());

    let edit = lifecycle
        .edit(listing.id, seller, sample_listing("Renamed after sale"))
        .await;
    assert!(matches!(edit, Err(AppError::InvalidTransition(_))));
}

#[tokio::test]
#[ignore]
async fn non_json_callback_body_still_leaves_audit_row() {
    let pool = test_pool().await;
    let engine = ReconciliationEngine::new(pool.clone(), Notifier::new());

    let marker = format!("garbage-{}", Uuid::new_v4().simple());
    let result = engine.process_raw(marker.as_bytes()).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let (processed, error_message): (bool, String) = sqlx::query_as(
        "SELECT processed, error_message FROM payment_webhooks WHERE data #>> '{}' = $1",
    )
    .bind(&marker)
    .fetch_one(&pool)
    .await
    .expect("audit row exists");

    assert!(!processed);
    assert!(error_message.starts_with("invalid JSON body"));
}

#[tokio::test]
#[ignore]
async fn listing_creation_rejects_unknown_seller() {
    let pool = test_pool().await;
    let lifecycle = ListingLifecycle::new(pool.clone(), Notifier::new());

    let result = lifecycle
        .create_free(Uuid::new_v4(), sample_listing("Ghost sofa"))
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}
