//! Quota and premium-plan policy.
//! Pure decision functions, no I/O. The quota *increment* itself is an atomic
//! conditional UPDATE in the db layer; this module owns the constants and the
//! plan price table.

use bigdecimal::BigDecimal;

/// Lifetime number of free ads each user may post.
pub const FREE_ADS_LIMIT: i32 = 3;

/// Days until a free (non-premium) ad expires after publication.
pub const FREE_AD_EXPIRY_DAYS: i64 = 4;

/// Premium plans: (days, price in KES).
pub const PREMIUM_PLANS: &[(i32, i64)] = &[
    (5, 150),
    (7, 200),
    (10, 230),
    (13, 250),
    (15, 280),
    (20, 315),
    (25, 335),
    (30, 379),
];

/// Price for a premium plan, or None for an unknown number of days.
pub fn price_for_plan(days: i32) -> Option<BigDecimal> {
    PREMIUM_PLANS
        .iter()
        .find(|(plan_days, _)| *plan_days == days)
        .map(|(_, price)| BigDecimal::from(*price))
}

pub fn is_valid_plan(days: i32) -> bool {
    PREMIUM_PLANS.iter().any(|(plan_days, _)| *plan_days == days)
}

pub fn can_post_free_ad(free_ads_used: i32) -> bool {
    free_ads_used < FREE_ADS_LIMIT
}

pub fn remaining_free_ads(free_ads_used: i32) -> i32 {
    (FREE_ADS_LIMIT - free_ads_used).max(0)
}
