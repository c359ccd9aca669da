//! Background worker loop: periodic expiry sweep for free listings plus
//! status-poll reconciliation for payments stuck in `processing` with no
//! callback. Runs alongside the HTTP server; errors are logged and the loop
//! continues.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info};

use crate::db::queries;
use crate::services::lifecycle::ListingLifecycle;
use crate::services::notifier::{Notification, Notifier};
use crate::services::payment::{PROCESSING_TIMEOUT_MINUTES, PaymentService};

const SWEEP_INTERVAL_SECS: u64 = 60;
const STALE_PAYMENT_BATCH: i64 = 10;

pub async fn run_sweeper(
    pool: PgPool,
    lifecycle: ListingLifecycle,
    payments: PaymentService,
    notifier: Notifier,
) {
    info!("lifecycle sweeper started");

    loop {
        if let Err(e) = sweep_once(&pool, &lifecycle, &payments, &notifier).await {
            error!("sweeper iteration error: {}", e);
        }

        sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
    }
}

pub async fn sweep_once(
    pool: &PgPool,
    lifecycle: &ListingLifecycle,
    payments: &PaymentService,
    notifier: &Notifier,
) -> anyhow::Result<()> {
    let now = Utc::now();

    let expired = lifecycle.expire_due(now).await?;
    if expired > 0 {
        notifier.dispatch(Notification::ListingExpired { count: expired });
    }

    let cutoff = now - ChronoDuration::minutes(PROCESSING_TIMEOUT_MINUTES);
    let stale = queries::stale_processing_payments(pool, cutoff, STALE_PAYMENT_BATCH).await?;

    if stale.is_empty() {
        return Ok(());
    }

    debug!(count = stale.len(), "reconciling stale processing payments");

    for payment in stale {
        let payment_id = payment.id;
        if let Err(e) = payments.reconcile_by_query(payment).await {
            // One stuck payment must not block the rest of the batch.
            error!(%payment_id, "stale payment reconciliation failed: {}", e);
        }
    }

    Ok(())
}
