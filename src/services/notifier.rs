//! Fire-and-forget notification dispatch. Core state never depends on
//! delivery; the transport behind `dispatch` is a collaborator outside this
//! service, so here each event is logged with its payload.

use bigdecimal::BigDecimal;
use uuid::Uuid;

/// Notification kinds as a tagged variant, each carrying its own payload,
/// dispatched by exhaustive match rather than string comparison.
#[derive(Debug, Clone)]
pub enum Notification {
    PaymentCompleted {
        user_id: Uuid,
        payment_id: Uuid,
        reference: String,
        amount: BigDecimal,
        premium_days: i32,
    },
    PaymentFailed {
        user_id: Uuid,
        payment_id: Uuid,
        reference: String,
        reason: String,
    },
    ListingExpired {
        count: u64,
    },
    ListingReactivated {
        listing_id: Uuid,
        seller_id: Uuid,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Notifier;

impl Notifier {
    pub fn new() -> Self {
        Self
    }

    pub fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::PaymentCompleted {
                user_id,
                payment_id,
                reference,
                amount,
                premium_days,
            } => {
                tracing::info!(
                    %user_id,
                    %payment_id,
                    reference,
                    %amount,
                    premium_days,
                    "notify: payment completed"
                );
            }
            Notification::PaymentFailed {
                user_id,
                payment_id,
                reference,
                reason,
            } => {
                tracing::info!(%user_id, %payment_id, reference, reason, "notify: payment failed");
            }
            Notification::ListingExpired { count } => {
                tracing::info!(count, "notify: listings expired");
            }
            Notification::ListingReactivated {
                listing_id,
                seller_id,
            } => {
                tracing::info!(%listing_id, %seller_id, "notify: listing reactivated");
            }
        }
    }
}
