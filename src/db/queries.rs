use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{Listing, MpesaTransaction, Payment, PaymentWebhook, User};

// --- User queries ---

pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn user_exists(pool: &PgPool, id: Uuid) -> Result<bool> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Atomically consumes one free-ad slot: increments only while below the
/// limit and reports whether the increment happened. A single conditional
/// UPDATE, so two concurrent creations for the same user cannot both pass.
pub async fn try_consume_free_ad(
    executor: &mut SqlxTransaction<'_, Postgres>,
    user_id: Uuid,
    limit: i32,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET free_ads_used = free_ads_used + 1 WHERE id = $1 AND free_ads_used < $2",
    )
    .bind(user_id)
    .bind(limit)
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn increment_total_listings(
    executor: &mut SqlxTransaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<()> {
    sqlx::query("UPDATE users SET total_listings = total_listings + 1 WHERE id = $1")
        .bind(user_id)
        .execute(&mut **executor)
        .await?;

    Ok(())
}

pub async fn increment_successful_transactions(pool: &PgPool, user_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE users SET successful_transactions = successful_transactions + 1 WHERE id = $1",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

// --- Listing queries ---

pub async fn insert_listing(
    executor: &mut SqlxTransaction<'_, Postgres>,
    listing: &Listing,
) -> Result<Listing> {
    sqlx::query_as::<_, Listing>(
        r#"
        INSERT INTO listings (
            id, seller_id, title, description, price, currency, category,
            condition, location, delivery_option, status, is_premium,
            original_price, discount_percentage, slug,
            created_at, updated_at, published_at, expires_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *
        "#,
    )
    .bind(listing.id)
    .bind(listing.seller_id)
    .bind(&listing.title)
    .bind(&listing.description)
    .bind(&listing.price)
    .bind(&listing.currency)
    .bind(&listing.category)
    .bind(&listing.condition)
    .bind(&listing.location)
    .bind(&listing.delivery_option)
    .bind(&listing.status)
    .bind(listing.is_premium)
    .bind(&listing.original_price)
    .bind(listing.discount_percentage)
    .bind(&listing.slug)
    .bind(listing.created_at)
    .bind(listing.updated_at)
    .bind(listing.published_at)
    .bind(listing.expires_at)
    .fetch_one(&mut **executor)
    .await
}

pub async fn get_listing(pool: &PgPool, id: Uuid) -> Result<Listing> {
    sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Seller content update. Status, slug and counters are untouched. The
/// status guard in the WHERE clause keeps an edit from landing on a listing
/// a concurrent transition just made terminal; None means the window closed.
pub async fn update_listing_content(pool: &PgPool, listing: &Listing) -> Result<Option<Listing>> {
    sqlx::query_as::<_, Listing>(
        r#"
        UPDATE listings
        SET title = $2, description = $3, price = $4, category = $5,
            condition = $6, location = $7, delivery_option = $8,
            original_price = $9, discount_percentage = $10, updated_at = NOW()
        WHERE id = $1 AND status IN ('draft', 'active')
        RETURNING *
        "#,
    )
    .bind(listing.id)
    .bind(&listing.title)
    .bind(&listing.description)
    .bind(&listing.price)
    .bind(&listing.category)
    .bind(&listing.condition)
    .bind(&listing.location)
    .bind(&listing.delivery_option)
    .bind(&listing.original_price)
    .bind(listing.discount_percentage)
    .fetch_optional(pool)
    .await
}

/// Guarded status transition: updates only when the row is still in
/// `expected_status`. Returns whether this caller won the transition.
pub async fn transition_listing_status(
    pool: &PgPool,
    id: Uuid,
    expected_status: &str,
    new_status: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE listings SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(expected_status)
    .bind(new_status)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn activate_listing(
    pool: &PgPool,
    id: Uuid,
    published_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE listings
        SET status = 'active',
            published_at = COALESCE(published_at, $2),
            expires_at = CASE WHEN is_premium THEN expires_at ELSE $3 END,
            updated_at = NOW()
        WHERE id = $1 AND status = 'draft'
        "#,
    )
    .bind(id)
    .bind(published_at)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Batch expiry sweep. Already-expired listings are untouched, so the sweep is
/// safe to run concurrently and repeatedly.
pub async fn expire_due_listings(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE listings
        SET status = 'expired', updated_at = NOW()
        WHERE status = 'active' AND is_premium = FALSE AND expires_at <= $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Premium upgrade inside a reconciliation transaction. Does not touch
/// `status`: reactivation of an expired listing stays an explicit action.
pub async fn make_listing_premium(
    executor: &mut SqlxTransaction<'_, Postgres>,
    listing_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE listings SET is_premium = TRUE, expires_at = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(listing_id)
    .bind(expires_at)
    .execute(&mut **executor)
    .await?;

    Ok(())
}

/// Reactivation is only valid for expired premium listings; the guard lives in
/// the WHERE clause so a concurrent transition cannot slip through.
pub async fn reactivate_listing(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE listings
        SET status = 'active', updated_at = NOW()
        WHERE id = $1 AND status = 'expired' AND is_premium = TRUE
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn increment_listing_views(pool: &PgPool, id: Uuid, unique: bool) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE listings
        SET views = views + 1,
            unique_views = unique_views + CASE WHEN $2 THEN 1 ELSE 0 END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(unique)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn increment_listing_contacts(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE listings SET contact_count = contact_count + 1 WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

// --- Payment queries ---

pub async fn insert_payment(pool: &PgPool, payment: &Payment) -> Result<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (
            id, user_id, amount, currency, payment_method, status, phone_number,
            checkout_request_id, receipt_number, transaction_id, premium_days,
            listing_id, reference, description, callback_data,
            created_at, updated_at, completed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(payment.user_id)
    .bind(&payment.amount)
    .bind(&payment.currency)
    .bind(&payment.payment_method)
    .bind(&payment.status)
    .bind(&payment.phone_number)
    .bind(&payment.checkout_request_id)
    .bind(&payment.receipt_number)
    .bind(&payment.transaction_id)
    .bind(payment.premium_days)
    .bind(payment.listing_id)
    .bind(&payment.reference)
    .bind(&payment.description)
    .bind(&payment.callback_data)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .bind(payment.completed_at)
    .fetch_one(pool)
    .await
}

pub async fn get_payment(pool: &PgPool, id: Uuid) -> Result<Payment> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn get_payment_for_user(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<Payment> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// Row-locks the payment matching a gateway checkout id. Serializes concurrent
/// callback deliveries for the same payment.
pub async fn lock_payment_by_checkout_id(
    executor: &mut SqlxTransaction<'_, Postgres>,
    checkout_request_id: &str,
) -> Result<Option<Payment>> {
    sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE checkout_request_id = $1 FOR UPDATE",
    )
    .bind(checkout_request_id)
    .fetch_optional(&mut **executor)
    .await
}

pub async fn lock_payment(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Payment>> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **executor)
        .await
}

pub async fn mark_payment_processing(
    pool: &PgPool,
    id: Uuid,
    checkout_request_id: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'processing', checkout_request_id = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(checkout_request_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Completes a payment if it is still pending or processing. The status guard
/// in the WHERE clause is the idempotency barrier: a replayed callback finds
/// zero rows to update and must not re-run side effects.
pub async fn complete_payment(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    receipt_number: Option<&str>,
    transaction_id: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'completed',
            completed_at = NOW(),
            receipt_number = COALESCE($2, receipt_number),
            transaction_id = COALESCE($3, transaction_id),
            updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(id)
    .bind(receipt_number)
    .bind(transaction_id)
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn fail_payment(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    reason: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'failed',
            description = description || E'\nFailure reason: ' || $2,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn cancel_payment(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'cancelled', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(id)
    .execute(&mut **executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn record_payment_callback_data(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    callback_data: &serde_json::Value,
) -> Result<()> {
    sqlx::query("UPDATE payments SET callback_data = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(callback_data)
        .execute(&mut **executor)
        .await?;

    Ok(())
}

/// Payments stuck in `processing` with no callback beyond the cutoff; these go
/// through the status-poll reconciliation path.
pub async fn stale_processing_payments(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Payment>> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT * FROM payments
        WHERE status = 'processing'
          AND checkout_request_id IS NOT NULL
          AND updated_at <= $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// --- M-PESA transaction queries ---

/// Idempotent upsert keyed on the gateway's checkout request id. Duplicate
/// callback delivery updates the existing row instead of inserting a second.
pub async fn upsert_mpesa_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    merchant_request_id: &str,
    checkout_request_id: &str,
    result_code: Option<i32>,
    result_desc: &str,
    raw_data: &serde_json::Value,
) -> Result<MpesaTransaction> {
    sqlx::query_as::<_, MpesaTransaction>(
        r#"
        INSERT INTO mpesa_transactions (
            id, merchant_request_id, checkout_request_id, result_code, result_desc, raw_data
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (checkout_request_id) DO UPDATE
        SET result_code = EXCLUDED.result_code,
            result_desc = EXCLUDED.result_desc,
            raw_data = EXCLUDED.raw_data
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(merchant_request_id)
    .bind(checkout_request_id)
    .bind(result_code)
    .bind(result_desc)
    .bind(raw_data)
    .fetch_one(&mut **executor)
    .await
}

pub async fn update_mpesa_transaction_details(
    executor: &mut SqlxTransaction<'_, Postgres>,
    checkout_request_id: &str,
    amount: Option<&BigDecimal>,
    receipt_number: Option<&str>,
    transaction_date: Option<DateTime<Utc>>,
    phone_number: Option<&str>,
    payment_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE mpesa_transactions
        SET amount = COALESCE($2, amount),
            receipt_number = COALESCE($3, receipt_number),
            transaction_date = COALESCE($4, transaction_date),
            phone_number = COALESCE($5, phone_number),
            payment_id = $6
        WHERE checkout_request_id = $1
        "#,
    )
    .bind(checkout_request_id)
    .bind(amount)
    .bind(receipt_number)
    .bind(transaction_date)
    .bind(phone_number)
    .bind(payment_id)
    .execute(&mut **executor)
    .await?;

    Ok(())
}

// --- Webhook quarantine queries ---

pub async fn insert_webhook(
    pool: &PgPool,
    source: &str,
    event_type: &str,
    data: &serde_json::Value,
) -> Result<PaymentWebhook> {
    sqlx::query_as::<_, PaymentWebhook>(
        r#"
        INSERT INTO payment_webhooks (id, source, event_type, data)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(source)
    .bind(event_type)
    .bind(data)
    .fetch_one(pool)
    .await
}

pub async fn mark_webhook(
    pool: &PgPool,
    id: Uuid,
    processed: bool,
    error_message: &str,
) -> Result<()> {
    sqlx::query("UPDATE payment_webhooks SET processed = $2, error_message = $3 WHERE id = $1")
        .bind(id)
        .bind(processed)
        .bind(error_message)
        .execute(pool)
        .await?;

    Ok(())
}
