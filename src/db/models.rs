use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub phone_number: String,
    pub free_ads_used: i32,
    pub is_premium: bool,
    pub total_listings: i32,
    pub successful_transactions: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub currency: String,
    pub category: String,
    pub condition: String,
    pub location: String,
    pub delivery_option: String,
    pub status: String,
    pub is_premium: bool,
    pub original_price: Option<BigDecimal>,
    pub discount_percentage: Option<i32>,
    pub slug: String,
    pub views: i32,
    pub unique_views: i32,
    pub contact_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub phone_number: String,
    pub checkout_request_id: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_id: Option<String>,
    pub premium_days: i32,
    pub listing_id: Option<Uuid>,
    pub reference: String,
    pub description: String,
    pub callback_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        user_id: Uuid,
        amount: BigDecimal,
        premium_days: i32,
        phone_number: String,
        listing_id: Option<Uuid>,
        description: String,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            user_id,
            amount,
            currency: "KES".to_string(),
            payment_method: "mpesa".to_string(),
            status: "pending".to_string(),
            phone_number,
            checkout_request_id: None,
            receipt_number: None,
            transaction_id: None,
            premium_days,
            listing_id,
            reference: generate_reference(&id, now),
            description,
            callback_data: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Human-readable unique payment reference: date-stamped plus the first eight
/// hex digits of the payment id. Immutable once assigned.
pub fn generate_reference(id: &Uuid, at: DateTime<Utc>) -> String {
    let id_fragment: String = id.simple().to_string()[..8].to_uppercase();
    format!("MKT{}{}", at.format("%Y%m%d"), id_fragment)
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MpesaTransaction {
    pub id: Uuid,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: Option<i32>,
    pub result_desc: String,
    pub amount: Option<BigDecimal>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
    pub payment_id: Option<Uuid>,
    pub raw_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub data: serde_json::Value,
    pub processed: bool,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}
