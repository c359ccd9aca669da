//! Payment status state machine.
//!
//! ```text
//! pending --gateway accepts push--> processing
//! pending --gateway rejects push--> failed
//! processing --callback success--> completed
//! processing --callback failure--> failed
//! processing --user-cancel/timeout--> cancelled
//! pending|processing --user/admin cancel--> cancelled
//! ```
//!
//! `completed`, `failed`, `cancelled` and `refunded` are terminal. A payment
//! record is never deleted; it is the financial audit trail.

use std::fmt;
use std::str::FromStr;

/// M-PESA result code signalling a successful push payment.
pub const RESULT_CODE_SUCCESS: i32 = 0;

/// Result codes reported when the payer cancelled the prompt or let it time
/// out. These map to `cancelled`, not `failed`.
pub const RESULT_CODES_USER_CANCEL: &[i32] = &[1032, 1037];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Pending, PaymentStatus::Processing) => true,
            (PaymentStatus::Pending, PaymentStatus::Completed) => true,
            (PaymentStatus::Pending, PaymentStatus::Failed) => true,
            (PaymentStatus::Pending, PaymentStatus::Cancelled) => true,
            (PaymentStatus::Processing, PaymentStatus::Completed) => true,
            (PaymentStatus::Processing, PaymentStatus::Failed) => true,
            (PaymentStatus::Processing, PaymentStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Terminal outcome a gateway result code maps to.
pub fn outcome_for_result_code(result_code: i32) -> PaymentStatus {
    if result_code == RESULT_CODE_SUCCESS {
        PaymentStatus::Completed
    } else if RESULT_CODES_USER_CANCEL.contains(&result_code) {
        PaymentStatus::Cancelled
    } else {
        PaymentStatus::Failed
    }
}
