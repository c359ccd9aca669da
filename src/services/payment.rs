//! Payment ledger service: creation with plan/phone validation and STK push
//! initiation, explicit user cancellation, and the status-poll fallback for
//! payments whose callback never arrived. Status transitions are guarded
//! UPDATEs; the poll path and the callback path share the same outcome
//! application so replays stay idempotent.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::Payment;
use crate::db::queries;
use crate::domain::payment::{PaymentStatus, outcome_for_result_code};
use crate::error::AppError;
use crate::mpesa::DarajaClient;
use crate::policy;
use crate::services::notifier::{Notification, Notifier};
use crate::validation;

/// How long a payment may sit in `processing` before the sweeper reconciles
/// it through a status poll.
pub const PROCESSING_TIMEOUT_MINUTES: i64 = 5;

#[derive(Debug)]
pub struct NewPayment {
    pub amount: BigDecimal,
    pub premium_days: i32,
    pub phone_number: String,
    pub listing_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    gateway: DarajaClient,
    notifier: Notifier,
}

impl PaymentService {
    pub fn new(pool: PgPool, gateway: DarajaClient, notifier: Notifier) -> Self {
        Self {
            pool,
            gateway,
            notifier,
        }
    }

    /// Creates a pending payment and initiates the STK push. The returned
    /// payment reflects the acknowledgment: `processing` with a checkout id
    /// when the push was queued, `failed` with the provider's description
    /// when it was rejected or the gateway was unreachable.
    pub async fn create(&self, user_id: Uuid, input: NewPayment) -> Result<Payment, AppError> {
        validation::validate_plan_amount(input.premium_days, &input.amount)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let phone_number = validation::normalize_msisdn(&input.phone_number)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if let Some(listing_id) = input.listing_id {
            let listing = queries::get_listing(&self.pool, listing_id)
                .await
                .map_err(|e| match e {
                    sqlx::Error::RowNotFound => {
                        AppError::NotFound(format!("listing {} not found", listing_id))
                    }
                    other => AppError::Database(other),
                })?;
            if listing.seller_id != user_id {
                return Err(AppError::NotOwner(
                    "you can only upgrade your own listings".to_string(),
                ));
            }
        }

        let description = format!("{} days premium", input.premium_days);
        let payment = Payment::new(
            user_id,
            input.amount,
            input.premium_days,
            phone_number.clone(),
            input.listing_id,
            description.clone(),
        );
        let payment = queries::insert_payment(&self.pool, &payment).await?;

        // Whole KES; the plan table is integer-priced.
        let push_amount = policy::price_for_plan(payment.premium_days)
            .unwrap_or_else(|| payment.amount.clone())
            .with_scale(0)
            .to_string();

        match self
            .gateway
            .stk_push(&phone_number, &push_amount, &payment.reference, &description)
            .await
        {
            Ok(ack) if ack.accepted() => {
                queries::mark_payment_processing(
                    &self.pool,
                    payment.id,
                    &ack.checkout_request_id,
                )
                .await?;
                tracing::info!(
                    payment_id = %payment.id,
                    reference = payment.reference,
                    checkout_request_id = ack.checkout_request_id,
                    "STK push queued"
                );
            }
            Ok(ack) => {
                let mut tx = self.pool.begin().await?;
                queries::fail_payment(&mut tx, payment.id, &ack.response_description).await?;
                tx.commit().await?;
                tracing::warn!(
                    payment_id = %payment.id,
                    response_code = ack.response_code,
                    "STK push rejected by gateway"
                );
            }
            Err(e) => {
                let reason = e.to_string();
                let mut tx = self.pool.begin().await?;
                queries::fail_payment(&mut tx, payment.id, &reason).await?;
                tx.commit().await?;
                tracing::error!(payment_id = %payment.id, error = reason, "STK push failed");
            }
        }

        Ok(queries::get_payment(&self.pool, payment.id).await?)
    }

    pub async fn get_for_user(&self, payment_id: Uuid, user_id: Uuid) -> Result<Payment, AppError> {
        queries::get_payment_for_user(&self.pool, payment_id, user_id)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    AppError::NotFound(format!("payment {} not found", payment_id))
                }
                other => AppError::Database(other),
            })
    }

    /// Explicit user cancel; only pending/processing payments can be cancelled.
    pub async fn cancel(&self, payment_id: Uuid, user_id: Uuid) -> Result<Payment, AppError> {
        let payment = self.get_for_user(payment_id, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let won = queries::cancel_payment(&mut tx, payment.id).await?;
        tx.commit().await?;

        if !won {
            return Err(AppError::InvalidTransition(
                "only pending or processing payments can be cancelled".to_string(),
            ));
        }

        Ok(queries::get_payment(&self.pool, payment.id).await?)
    }

    /// Poll-and-reconcile: queries the gateway for the final status of a push
    /// and applies the outcome through the same idempotent entry points the
    /// callback path uses. A payment already terminal is returned unchanged.
    pub async fn poll_status(&self, payment_id: Uuid, user_id: Uuid) -> Result<Payment, AppError> {
        let payment = self.get_for_user(payment_id, user_id).await?;
        self.reconcile_by_query(payment).await
    }

    pub(crate) async fn reconcile_by_query(&self, payment: Payment) -> Result<Payment, AppError> {
        let status: PaymentStatus = payment
            .status
            .parse()
            .map_err(AppError::Internal)?;
        if status.is_terminal() {
            return Ok(payment);
        }

        let checkout_request_id = payment.checkout_request_id.clone().ok_or_else(|| {
            AppError::BadRequest("payment has no gateway checkout request id".to_string())
        })?;

        let outcome = self.gateway.query_status(&checkout_request_id).await?;
        let result_code = match outcome.result_code.as_deref() {
            Some(code) => code.parse::<i32>().map_err(|_| {
                AppError::Internal(format!("gateway returned non-numeric result code: {}", code))
            })?,
            // No result yet; the push is still in flight.
            None => return Ok(payment),
        };

        let reason = outcome
            .result_desc
            .unwrap_or_else(|| "status query reported failure".to_string());

        let mut tx = self.pool.begin().await?;
        let locked = queries::lock_payment(&mut tx, payment.id).await?;
        let applied = match locked {
            Some(locked) => {
                apply_gateway_outcome(
                    &mut tx,
                    &locked,
                    outcome_for_result_code(result_code),
                    None,
                    Some(&checkout_request_id),
                    &reason,
                )
                .await?
            }
            None => None,
        };
        tx.commit().await?;

        if let Some(notification) = applied {
            self.notifier.dispatch(notification);
        }

        Ok(queries::get_payment(&self.pool, payment.id).await?)
    }
}

/// Applies a terminal gateway outcome to a payment inside the caller's
/// transaction. Completion drives the listing premium side effect in the same
/// transaction, exactly once: the guarded UPDATE returns false for a payment
/// that already left pending/processing, and then nothing further runs.
///
/// Returns the notification to dispatch after commit, or None when this call
/// lost the race (idempotent replay).
pub(crate) async fn apply_gateway_outcome(
    tx: &mut SqlxTransaction<'_, Postgres>,
    payment: &Payment,
    outcome: PaymentStatus,
    receipt_number: Option<&str>,
    transaction_id: Option<&str>,
    reason: &str,
) -> Result<Option<Notification>, AppError> {
    match outcome {
        PaymentStatus::Completed => {
            let won =
                queries::complete_payment(tx, payment.id, receipt_number, transaction_id).await?;
            if !won {
                return Ok(None);
            }

            if let Some(listing_id) = payment.listing_id {
                let expires_at = Utc::now() + Duration::days(payment.premium_days as i64);
                queries::make_listing_premium(tx, listing_id, expires_at).await?;
            }

            Ok(Some(Notification::PaymentCompleted {
                user_id: payment.user_id,
                payment_id: payment.id,
                reference: payment.reference.clone(),
                amount: payment.amount.clone(),
                premium_days: payment.premium_days,
            }))
        }
        PaymentStatus::Cancelled => {
            let won = queries::cancel_payment(tx, payment.id).await?;
            if !won {
                return Ok(None);
            }
            Ok(None)
        }
        PaymentStatus::Failed => {
            let won = queries::fail_payment(tx, payment.id, reason).await?;
            if !won {
                return Ok(None);
            }

            Ok(Some(Notification::PaymentFailed {
                user_id: payment.user_id,
                payment_id: payment.id,
                reference: payment.reference.clone(),
                reason: reason.to_string(),
            }))
        }
        other => Err(AppError::Internal(format!(
            "{} is not a gateway outcome",
            other
        ))),
    }
}
