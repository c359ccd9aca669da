//! Callback reconciliation engine: turns an asynchronous, untrusted, possibly
//! duplicated gateway callback into exactly-once effects on the payment
//! ledger and the listing lifecycle.
//!
//! The raw payload is persisted verbatim before any interpretation. Gateway
//! record upsert, payment transition and listing premium upgrade then run in
//! one transaction; the payment row is locked so concurrent deliveries of the
//! same callback serialize, and the status guard turns the loser into a
//! no-op. The provider retries on non-2xx, so duplicate delivery is the
//! normal case here, not an edge case.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;

use crate::db::queries;
use crate::domain::payment::outcome_for_result_code;
use crate::error::AppError;
use crate::services::notifier::Notifier;
use crate::services::payment::apply_gateway_outcome;

const SOURCE_MPESA: &str = "mpesa";
const EVENT_STK_CALLBACK: &str = "stk_callback";

/// What the transport layer should tell the provider. Quarantined callbacks
/// (no matching payment) still get a 200 so the provider stops retrying; the
/// webhook row stays flagged for manual reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    Processed,
    Quarantined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StkCallback {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i32,
    pub result_desc: String,
    pub amount: Option<BigDecimal>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
}

impl StkCallback {
    /// Parses the provider's callback envelope. Metadata items are matched by
    /// name, order-independent; missing items are tolerated (failure
    /// callbacks carry none).
    pub fn parse(payload: &serde_json::Value) -> Result<Self, String> {
        let stk = payload
            .get("Body")
            .and_then(|b| b.get("stkCallback"))
            .ok_or("missing Body.stkCallback")?;

        let checkout_request_id = stk
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .ok_or("missing CheckoutRequestID")?
            .to_string();
        if checkout_request_id.is_empty() {
            return Err("empty CheckoutRequestID".to_string());
        }

        let result_code = stk
            .get("ResultCode")
            .and_then(|v| v.as_i64())
            .ok_or("missing or non-numeric ResultCode")? as i32;

        let merchant_request_id = stk
            .get("MerchantRequestID")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let result_desc = stk
            .get("ResultDesc")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut callback = StkCallback {
            merchant_request_id,
            checkout_request_id,
            result_code,
            result_desc,
            amount: None,
            receipt_number: None,
            transaction_date: None,
            phone_number: None,
        };

        let items = stk
            .get("CallbackMetadata")
            .and_then(|m| m.get("Item"))
            .and_then(|i| i.as_array());

        if let Some(items) = items {
            for item in items {
                let name = item.get("Name").and_then(|n| n.as_str()).unwrap_or("");
                let value = item.get("Value");

                match name {
                    "Amount" => callback.amount = value.and_then(json_number_to_decimal),
                    "MpesaReceiptNumber" => {
                        callback.receipt_number =
                            value.and_then(|v| v.as_str()).map(str::to_string)
                    }
                    "TransactionDate" => {
                        callback.transaction_date = value.and_then(parse_transaction_date)
                    }
                    "PhoneNumber" => callback.phone_number = value.map(json_value_to_string),
                    _ => {}
                }
            }
        }

        Ok(callback)
    }

    pub fn is_success(&self) -> bool {
        self.result_code == crate::domain::payment::RESULT_CODE_SUCCESS
    }
}

fn json_number_to_decimal(value: &serde_json::Value) -> Option<BigDecimal> {
    match value {
        serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The provider reports timestamps as numeric `%Y%m%d%H%M%S`.
fn parse_transaction_date(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let raw = json_value_to_string(value);
    NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    pool: PgPool,
    notifier: Notifier,
}

impl ReconciliationEngine {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    /// Transport entry point. A body that is not even JSON still leaves an
    /// audit row (stored as a JSON string) before the 400 goes back.
    pub async fn process_raw(&self, body: &[u8]) -> Result<CallbackDisposition, AppError> {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(raw) => self.process_callback(raw).await,
            Err(e) => {
                let raw = serde_json::Value::String(String::from_utf8_lossy(body).into_owned());
                let webhook =
                    queries::insert_webhook(&self.pool, SOURCE_MPESA, EVENT_STK_CALLBACK, &raw)
                        .await?;
                let reason = format!("invalid JSON body: {}", e);
                queries::mark_webhook(&self.pool, webhook.id, false, &reason).await?;
                tracing::error!(webhook_id = %webhook.id, "non-JSON gateway callback");
                Err(AppError::BadRequest(reason))
            }
        }
    }

    pub async fn process_callback(
        &self,
        raw: serde_json::Value,
    ) -> Result<CallbackDisposition, AppError> {
        // Audit trail first, before any interpretation.
        let webhook =
            queries::insert_webhook(&self.pool, SOURCE_MPESA, EVENT_STK_CALLBACK, &raw).await?;

        let callback = match StkCallback::parse(&raw) {
            Ok(callback) => callback,
            Err(reason) => {
                queries::mark_webhook(&self.pool, webhook.id, false, &reason).await?;
                tracing::error!(webhook_id = %webhook.id, reason, "malformed gateway callback");
                // Non-2xx so the provider retries; the raw payload is kept.
                return Err(AppError::BadRequest(format!(
                    "malformed callback: {}",
                    reason
                )));
            }
        };

        let mut tx = self.pool.begin().await?;

        queries::upsert_mpesa_transaction(
            &mut tx,
            &callback.merchant_request_id,
            &callback.checkout_request_id,
            Some(callback.result_code),
            &callback.result_desc,
            &raw,
        )
        .await?;

        let payment =
            queries::lock_payment_by_checkout_id(&mut tx, &callback.checkout_request_id).await?;

        let Some(payment) = payment else {
            // Keep the gateway record, flag for manual reconciliation, and
            // answer 200 so the provider does not storm retries.
            tx.commit().await?;
            queries::mark_webhook(&self.pool, webhook.id, false, "no matching payment").await?;
            tracing::warn!(
                checkout_request_id = callback.checkout_request_id,
                "callback with no matching payment quarantined"
            );
            return Ok(CallbackDisposition::Quarantined);
        };

        queries::record_payment_callback_data(&mut tx, payment.id, &raw).await?;

        if callback.is_success() {
            queries::update_mpesa_transaction_details(
                &mut tx,
                &callback.checkout_request_id,
                callback.amount.as_ref(),
                callback.receipt_number.as_deref(),
                callback.transaction_date,
                callback.phone_number.as_deref(),
                payment.id,
            )
            .await?;
        } else {
            queries::update_mpesa_transaction_details(
                &mut tx,
                &callback.checkout_request_id,
                None,
                None,
                None,
                None,
                payment.id,
            )
            .await?;
        }

        let notification = apply_gateway_outcome(
            &mut tx,
            &payment,
            outcome_for_result_code(callback.result_code),
            callback.receipt_number.as_deref(),
            Some(&callback.checkout_request_id),
            &callback.result_desc,
        )
        .await?;

        tx.commit().await?;
        queries::mark_webhook(&self.pool, webhook.id, true, "").await?;

        match &notification {
            Some(_) => tracing::info!(
                payment_id = %payment.id,
                reference = payment.reference,
                result_code = callback.result_code,
                "callback reconciled"
            ),
            None => tracing::debug!(
                payment_id = %payment.id,
                "duplicate callback delivery observed, no-op"
            ),
        }

        if let Some(notification) = notification {
            self.notifier.dispatch(notification);
        }

        Ok(CallbackDisposition::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_payload() -> serde_json::Value {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
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
        })
    }

    #[test]
    fn parses_success_callback() {
        let callback = StkCallback::parse(&success_payload()).expect("parses");

        assert!(callback.is_success());
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.amount, Some(BigDecimal::from(200)));
        assert_eq!(callback.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(callback.phone_number.as_deref(), Some("254712345678"));

        let date = callback.transaction_date.expect("transaction date");
        assert_eq!(date.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-08-25 14:35:22");
    }

    #[test]
    fn metadata_is_order_independent() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "PhoneNumber", "Value": 254712345678u64},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "Amount", "Value": 150}
                        ]
                    }
                }
            }
        });

        let callback = StkCallback::parse(&payload).expect("parses");
        assert_eq!(callback.amount, Some(BigDecimal::from(150)));
        assert_eq!(callback.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert!(callback.transaction_date.is_none());
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_2",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let callback = StkCallback::parse(&payload).expect("parses");
        assert!(!callback.is_success());
        assert_eq!(callback.result_code, 1032);
        assert!(callback.amount.is_none());
        assert!(callback.receipt_number.is_none());
    }

    #[test]
    fn rejects_payload_without_envelope() {
        assert!(StkCallback::parse(&json!({"foo": "bar"})).is_err());
        assert!(StkCallback::parse(&json!({"Body": {}})).is_err());
    }

    #[test]
    fn rejects_missing_checkout_id() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "ResultCode": 0,
                    "ResultDesc": "ok"
                }
            }
        });

        assert!(StkCallback::parse(&payload).is_err());
    }

    #[test]
    fn rejects_non_numeric_result_code() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_3",
                    "ResultCode": "zero",
                    "ResultDesc": "ok"
                }
            }
        });

        assert!(StkCallback::parse(&payload).is_err());
    }

    #[test]
    fn unknown_metadata_names_are_ignored() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_4",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Balance", "Value": 12.5},
                            {"Name": "Amount", "Value": 230}
                        ]
                    }
                }
            }
        });

        let callback = StkCallback::parse(&payload).expect("parses");
        assert_eq!(callback.amount, Some(BigDecimal::from(230)));
    }
}
