//! HTTP client for the M-PESA Daraja STK push API.
//!
//! Three blocking network operations behind one adapter: access-token
//! retrieval, push initiation, and status query. No persistence and no retry
//! policy here; callers own retries. Tokens are fetched per call and not
//! cached.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{Config, Error as FailsafeError, StateMachine, backoff, failure_policy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DarajaError {
    #[error("Gateway auth failed: {0}")]
    Auth(String),
    #[error("Gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

#[derive(Debug, Clone)]
pub struct DarajaCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: &'a str,
    timestamp: &'a str,
    transaction_type: &'a str,
    amount: &'a str,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

/// Acknowledgment of a push request. A zero `response_code` only confirms the
/// prompt was queued; the payment outcome arrives later via callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode", default)]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

impl StkPushResponse {
    pub fn accepted(&self) -> bool {
        self.response_code == "0"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: &'a str,
    timestamp: &'a str,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode", default)]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
}

#[derive(Clone)]
pub struct DarajaClient {
    client: Client,
    base_url: String,
    credentials: DarajaCredentials,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl DarajaClient {
    pub fn new(base_url: String, credentials: DarajaCredentials) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        DarajaClient {
            client,
            base_url,
            credentials,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Exchanges client credentials for a short-lived bearer token.
    pub async fn access_token(&self) -> Result<String, DarajaError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url.trim_end_matches('/')
        );

        let basic = BASE64.encode(format!(
            "{}:{}",
            self.credentials.consumer_key, self.credentials.consumer_secret
        ));

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Basic {}", basic))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DarajaError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| DarajaError::Auth(format!("malformed token response: {}", e)))?;

        Ok(token.access_token)
    }

    /// Password for push/query requests: base64(shortcode + passkey + timestamp).
    fn generate_password(&self) -> (String, String) {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!(
            "{}{}{}",
            self.credentials.shortcode, self.credentials.passkey, timestamp
        ));
        (password, timestamp)
    }

    /// Initiates an STK push prompt on the payer's phone. `phone_number` must
    /// already be normalized to `2547…`/`2541…`. Returns the provider's raw
    /// acknowledgment; the caller inspects its response code.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: &str,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, DarajaError> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.generate_password();
        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.base_url.trim_end_matches('/')
        );

        let payload = serde_json::to_value(StkPushRequest {
            business_short_code: &self.credentials.shortcode,
            password: &password,
            timestamp: &timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: phone_number,
            party_b: &self.credentials.shortcode,
            phone_number,
            callback_url: &self.credentials.callback_url,
            account_reference,
            transaction_desc: description,
        })
        .map_err(|e| DarajaError::InvalidResponse(e.to_string()))?;

        let client = self.client.clone();
        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&payload)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(DarajaError::InvalidResponse(format!(
                        "push request returned {}: {}",
                        status, body
                    )));
                }

                let ack = response.json::<StkPushResponse>().await?;
                Ok(ack)
            })
            .await;

        match result {
            Ok(ack) => Ok(ack),
            Err(FailsafeError::Rejected) => Err(DarajaError::CircuitBreakerOpen(
                "Daraja circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Synchronous status poll for a previously-initiated push. Fallback for
    /// payments whose callback never arrived.
    pub async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StkQueryResponse, DarajaError> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.generate_password();
        let url = format!(
            "{}/mpesa/stkpushquery/v1/query",
            self.base_url.trim_end_matches('/')
        );

        let payload = serde_json::to_value(StkQueryRequest {
            business_short_code: &self.credentials.shortcode,
            password: &password,
            timestamp: &timestamp,
            checkout_request_id,
        })
        .map_err(|e| DarajaError::InvalidResponse(e.to_string()))?;

        let client = self.client.clone();
        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&payload)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(DarajaError::InvalidResponse(format!(
                        "status query returned {}: {}",
                        status, body
                    )));
                }

                let outcome = response.json::<StkQueryResponse>().await?;
                Ok(outcome)
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(FailsafeError::Rejected) => Err(DarajaError::CircuitBreakerOpen(
                "Daraja circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}
