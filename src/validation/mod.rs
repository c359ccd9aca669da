use bigdecimal::BigDecimal;
use std::fmt;

use crate::policy;

pub const TITLE_MAX_LEN: usize = 200;
pub const PHONE_NORMALIZED_LEN: usize = 12;
pub const DISCOUNT_MIN: i32 = 1;
pub const DISCOUNT_MAX: i32 = 99;

pub const ALLOWED_CONDITIONS: &[&str] = &[
    "brand_new",
    "like_new",
    "excellent",
    "good",
    "fair",
    "poor",
];

pub const ALLOWED_DELIVERY_OPTIONS: &[&str] = &["pickup_only", "delivery_available", "both"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

// Whitespace controls (tab, newline) stay so they still delimit words below.
pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Normalizes a Kenyan mobile number to international format: 12 digits
/// starting with 2547 or 2541. Accepts `07..`, `01..`, `254..` and `+254..`
/// inputs with incidental spaces or dashes.
pub fn normalize_msisdn(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect();

    let normalized = if cleaned.starts_with("254") {
        cleaned
    } else if cleaned.starts_with("07") || cleaned.starts_with("01") {
        format!("254{}", &cleaned[1..])
    } else {
        return Err(ValidationError::new(
            "phone_number",
            "must be a Kenyan mobile number",
        ));
    };

    if normalized.len() != PHONE_NORMALIZED_LEN {
        return Err(ValidationError::new(
            "phone_number",
            format!("must normalize to {} digits", PHONE_NORMALIZED_LEN),
        ));
    }

    if !normalized.starts_with("2547") && !normalized.starts_with("2541") {
        return Err(ValidationError::new(
            "phone_number",
            "must be a Safaricom-reachable mobile prefix (2547 or 2541)",
        ));
    }

    Ok(normalized)
}

/// Validates a premium plan selection: the day count must be a known plan and
/// the amount must exactly equal the table price. No tolerance; the plan table
/// is the canonical source of truth.
pub fn validate_plan_amount(premium_days: i32, amount: &BigDecimal) -> ValidationResult {
    let expected = policy::price_for_plan(premium_days).ok_or_else(|| {
        ValidationError::new("premium_days", "not a valid premium plan")
    })?;

    if amount != &expected {
        return Err(ValidationError::new(
            "amount",
            format!(
                "must be exactly {} KES for a {}-day plan",
                expected, premium_days
            ),
        ));
    }

    Ok(())
}

pub fn validate_price(price: &BigDecimal) -> ValidationResult {
    if price < &BigDecimal::from(0) {
        return Err(ValidationError::new("price", "must not be negative"));
    }

    Ok(())
}

pub fn validate_discount(discount_percentage: i32) -> ValidationResult {
    if !(DISCOUNT_MIN..=DISCOUNT_MAX).contains(&discount_percentage) {
        return Err(ValidationError::new(
            "discount_percentage",
            format!("must be between {} and {}", DISCOUNT_MIN, DISCOUNT_MAX),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn validates_enum_values() {
        assert!(validate_enum("condition", "good", ALLOWED_CONDITIONS).is_ok());
        assert!(validate_enum("condition", "mint", ALLOWED_CONDITIONS).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("hello\nworld"), "hello world");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
        assert_eq!(sanitize_string(" \n "), "");
    }

    #[test]
    fn normalizes_local_prefixes() {
        assert_eq!(normalize_msisdn("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("0112345678").unwrap(), "254112345678");
        assert_eq!(normalize_msisdn("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("+254 712 345 678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("0712-345-678").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_invalid_msisdns() {
        assert!(normalize_msisdn("12345").is_err());
        assert!(normalize_msisdn("0812345678").is_err());
        assert!(normalize_msisdn("25471234567").is_err()); // 11 digits
        assert!(normalize_msisdn("2547123456789").is_err()); // 13 digits
        assert!(normalize_msisdn("254212345678").is_err()); // landline prefix
        assert!(normalize_msisdn("").is_err());
    }

    #[test]
    fn exact_plan_amount_required() {
        let exact = BigDecimal::from(200);
        let off_by_one = BigDecimal::from(199);
        let fractional = BigDecimal::from_str("200.00").unwrap();

        assert!(validate_plan_amount(7, &exact).is_ok());
        assert!(validate_plan_amount(7, &off_by_one).is_err());
        // 200.00 == 200 as decimals
        assert!(validate_plan_amount(7, &fractional).is_ok());
    }

    #[test]
    fn unknown_plan_rejected() {
        assert!(validate_plan_amount(6, &BigDecimal::from(150)).is_err());
    }

    #[test]
    fn validates_price_and_discount() {
        assert!(validate_price(&BigDecimal::from(0)).is_ok());
        assert!(validate_price(&BigDecimal::from(-1)).is_err());
        assert!(validate_discount(1).is_ok());
        assert!(validate_discount(99).is_ok());
        assert!(validate_discount(0).is_err());
        assert!(validate_discount(100).is_err());
    }
}
