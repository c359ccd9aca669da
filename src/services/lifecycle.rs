//! Listing lifecycle engine: creation, activation, expiry, sale, premium
//! upgrade and reactivation. Every status change goes through a guarded
//! UPDATE so concurrent transitions cannot race past the state machine;
//! losing a race on an idempotent edge is a no-op, not an error.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Listing;
use crate::db::queries;
use crate::domain::ListingStatus;
use crate::error::AppError;
use crate::policy;
use crate::services::notifier::{Notification, Notifier};
use crate::validation;

#[derive(Debug)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub category: String,
    pub condition: String,
    pub location: String,
    pub delivery_option: String,
    pub original_price: Option<BigDecimal>,
    pub discount_percentage: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
pub enum Engagement {
    View { unique: bool },
    Contact,
}

#[derive(Clone)]
pub struct ListingLifecycle {
    pool: PgPool,
    notifier: Notifier,
}

impl ListingLifecycle {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    /// Free-tier listing creation. Consumes one free-ad slot atomically and
    /// publishes the listing immediately with the free-tier expiry window.
    pub async fn create_free(&self, seller_id: Uuid, input: NewListing) -> Result<Listing, AppError> {
        validate_listing_input(&input)?;

        let mut tx = self.pool.begin().await?;

        let consumed =
            queries::try_consume_free_ad(&mut tx, seller_id, policy::FREE_ADS_LIMIT).await?;
        if !consumed {
            tx.rollback().await?;
            // Zero rows also happens when the seller row does not exist.
            if !queries::user_exists(&self.pool, seller_id).await? {
                return Err(AppError::NotFound(format!("user {} not found", seller_id)));
            }
            return Err(AppError::QuotaExceeded(format!(
                "all {} free ads used; further listings must be premium",
                policy::FREE_ADS_LIMIT
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let listing = Listing {
            id,
            seller_id,
            title: validation::sanitize_string(&input.title),
            description: input.description,
            price: input.price,
            currency: "KES".to_string(),
            category: input.category,
            condition: input.condition,
            location: input.location,
            delivery_option: input.delivery_option,
            status: ListingStatus::Active.as_str().to_string(),
            is_premium: false,
            original_price: input.original_price,
            discount_percentage: input.discount_percentage,
            slug: make_slug(&input.title, &id),
            views: 0,
            unique_views: 0,
            contact_count: 0,
            created_at: now,
            updated_at: now,
            published_at: Some(now),
            expires_at: Some(now + Duration::days(policy::FREE_AD_EXPIRY_DAYS)),
        };

        let inserted = queries::insert_listing(&mut tx, &listing).await?;
        queries::increment_total_listings(&mut tx, seller_id).await?;

        tx.commit().await?;

        tracing::info!(listing_id = %inserted.id, seller_id = %seller_id, "free listing published");
        Ok(inserted)
    }

    async fn fetch(&self, listing_id: Uuid) -> Result<Listing, AppError> {
        queries::get_listing(&self.pool, listing_id)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    AppError::NotFound(format!("listing {} not found", listing_id))
                }
                other => AppError::Database(other),
            })
    }

    /// Seller content edit, allowed only while the listing is draft or
    /// active. Slug and status are immutable here.
    pub async fn edit(
        &self,
        listing_id: Uuid,
        seller_id: Uuid,
        input: NewListing,
    ) -> Result<Listing, AppError> {
        validate_listing_input(&input)?;

        let mut listing = self.fetch(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(AppError::NotOwner(
                "only the seller can edit a listing".to_string(),
            ));
        }

        let status = parse_status(&listing.status)?;
        if !status.allows_edit() {
            return Err(AppError::InvalidTransition(format!(
                "cannot edit a {} listing",
                status
            )));
        }

        listing.title = validation::sanitize_string(&input.title);
        listing.description = input.description;
        listing.price = input.price;
        listing.category = input.category;
        listing.condition = input.condition;
        listing.location = input.location;
        listing.delivery_option = input.delivery_option;
        listing.original_price = input.original_price;
        listing.discount_percentage = input.discount_percentage;

        queries::update_listing_content(&self.pool, &listing)
            .await?
            .ok_or_else(|| {
                AppError::InvalidTransition("listing can no longer be edited".to_string())
            })
    }

    /// Publishes a draft. Idempotent: an already-active listing with
    /// `published_at` set is left untouched.
    pub async fn activate(&self, listing_id: Uuid) -> Result<Listing, AppError> {
        let listing = self.fetch(listing_id).await?;
        let status = parse_status(&listing.status)?;

        if status == ListingStatus::Active && listing.published_at.is_some() {
            return Ok(listing);
        }

        if !status.can_transition_to(ListingStatus::Active, listing.is_premium) {
            return Err(AppError::InvalidTransition(format!(
                "cannot activate listing in status {}",
                status
            )));
        }

        let now = Utc::now();
        let expires_at = if listing.is_premium {
            None
        } else {
            Some(now + Duration::days(policy::FREE_AD_EXPIRY_DAYS))
        };

        // Guarded on draft; a concurrent activation simply wins the race.
        queries::activate_listing(&self.pool, listing_id, now, expires_at).await?;

        Ok(queries::get_listing(&self.pool, listing_id).await?)
    }

    /// Batch expiry sweep for free listings past their window. Safe to run
    /// concurrently and repeatedly.
    pub async fn expire_due(&self, now: chrono::DateTime<Utc>) -> Result<u64, AppError> {
        let expired = queries::expire_due_listings(&self.pool, now).await?;
        if expired > 0 {
            tracing::info!(count = expired, "expired free listings past their window");
        }
        Ok(expired)
    }

    /// Marks an active listing sold. Owner-only; terminal.
    pub async fn mark_sold(&self, listing_id: Uuid, seller_id: Uuid) -> Result<(), AppError> {
        let listing = self.fetch(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(AppError::NotOwner(
                "only the seller can mark a listing sold".to_string(),
            ));
        }

        let status = parse_status(&listing.status)?;
        if !status.can_transition_to(ListingStatus::Sold, listing.is_premium) {
            return Err(AppError::InvalidTransition(format!(
                "cannot mark listing sold from status {}",
                status
            )));
        }

        let won = queries::transition_listing_status(
            &self.pool,
            listing_id,
            ListingStatus::Active.as_str(),
            ListingStatus::Sold.as_str(),
        )
        .await?;

        if !won {
            return Err(AppError::InvalidTransition(
                "listing is no longer active".to_string(),
            ));
        }

        queries::increment_successful_transactions(&self.pool, seller_id).await?;
        Ok(())
    }

    /// Admin suspension. Terminal.
    pub async fn suspend(&self, listing_id: Uuid) -> Result<(), AppError> {
        let won = queries::transition_listing_status(
            &self.pool,
            listing_id,
            ListingStatus::Active.as_str(),
            ListingStatus::Suspended.as_str(),
        )
        .await?;

        if !won {
            return Err(AppError::InvalidTransition(
                "only active listings can be suspended".to_string(),
            ));
        }

        Ok(())
    }

    /// Upgrades a listing to premium for the purchased number of days.
    /// Allowed from any non-terminal state. An expired listing stays expired;
    /// reactivation is a separate explicit action.
    pub async fn make_premium(&self, listing_id: Uuid, days: i32) -> Result<(), AppError> {
        let listing = self.fetch(listing_id).await?;
        let status = parse_status(&listing.status)?;
        if status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "cannot upgrade a {} listing",
                status
            )));
        }

        let mut tx = self.pool.begin().await?;
        let expires_at = Utc::now() + Duration::days(days as i64);
        queries::make_listing_premium(&mut tx, listing_id, expires_at).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Reactivates an expired premium listing. The premium requirement is
    /// enforced in the guarded UPDATE itself.
    pub async fn reactivate(&self, listing_id: Uuid, seller_id: Uuid) -> Result<(), AppError> {
        let listing = self.fetch(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(AppError::NotOwner(
                "only the seller can reactivate a listing".to_string(),
            ));
        }

        let won = queries::reactivate_listing(&self.pool, listing_id).await?;
        if !won {
            return Err(AppError::InvalidTransition(
                "only expired premium listings can be reactivated".to_string(),
            ));
        }

        self.notifier.dispatch(Notification::ListingReactivated {
            listing_id,
            seller_id,
        });

        Ok(())
    }

    /// View/contact counters. Side effect only, no state transition.
    pub async fn report_engagement(
        &self,
        listing_id: Uuid,
        engagement: Engagement,
    ) -> Result<(), AppError> {
        match engagement {
            Engagement::View { unique } => {
                queries::increment_listing_views(&self.pool, listing_id, unique).await?
            }
            Engagement::Contact => {
                queries::increment_listing_contacts(&self.pool, listing_id).await?
            }
        }

        Ok(())
    }
}

fn validate_listing_input(input: &NewListing) -> Result<(), AppError> {
    let check = || -> validation::ValidationResult {
        validation::validate_required("title", &input.title)?;
        validation::validate_max_len("title", &input.title, validation::TITLE_MAX_LEN)?;
        validation::validate_required("description", &input.description)?;
        validation::validate_price(&input.price)?;
        validation::validate_required("category", &input.category)?;
        validation::validate_enum("condition", &input.condition, validation::ALLOWED_CONDITIONS)?;
        validation::validate_required("location", &input.location)?;
        validation::validate_enum(
            "delivery_option",
            &input.delivery_option,
            validation::ALLOWED_DELIVERY_OPTIONS,
        )?;
        if let Some(discount) = input.discount_percentage {
            validation::validate_discount(discount)?;
        }
        Ok(())
    };

    check().map_err(|e| AppError::Validation(e.to_string()))
}

fn parse_status(raw: &str) -> Result<ListingStatus, AppError> {
    raw.parse::<ListingStatus>().map_err(AppError::Internal)
}

/// Slug from the title plus an id fragment. The fragment makes the slug unique
/// without a read-check-insert race on the unique index.
fn make_slug(title: &str, id: &Uuid) -> String {
    let base: String = title
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    let base = base.trim_matches('-').to_string();
    let base: String = base.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    let fragment = &id.simple().to_string()[..8];

    if base.is_empty() {
        format!("listing-{}", fragment)
    } else {
        format!("{}-{}", base, fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercased_and_id_suffixed() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let slug = make_slug("iPhone 13 Pro, 256GB!", &id);

        assert_eq!(slug, "iphone-13-pro-256gb-a1b2c3d4");
    }

    #[test]
    fn slug_handles_symbol_only_titles() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        assert_eq!(make_slug("!!!", &id), "listing-a1b2c3d4");
    }

    #[test]
    fn slugs_differ_for_identical_titles() {
        let a = make_slug("Sofa set", &Uuid::new_v4());
        let b = make_slug("Sofa set", &Uuid::new_v4());
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_invalid_condition() {
        let input = NewListing {
            title: "Sofa".to_string(),
            description: "Three-seater".to_string(),
            price: BigDecimal::from(5000),
            category: "home-garden".to_string(),
            condition: "mint".to_string(),
            location: "Nairobi".to_string(),
            delivery_option: "both".to_string(),
            original_price: None,
            discount_percentage: None,
        };

        assert!(matches!(
            validate_listing_input(&input),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn rejects_negative_price() {
        let input = NewListing {
            title: "Sofa".to_string(),
            description: "Three-seater".to_string(),
            price: BigDecimal::from(-1),
            category: "home-garden".to_string(),
            condition: "good".to_string(),
            location: "Nairobi".to_string(),
            delivery_option: "pickup_only".to_string(),
            original_price: None,
            discount_percentage: None,
        };

        assert!(validate_listing_input(&input).is_err());
    }

    #[test]
    fn rejects_out_of_range_discount() {
        let input = NewListing {
            title: "Sofa".to_string(),
            description: "Three-seater".to_string(),
            price: BigDecimal::from(5000),
            category: "home-garden".to_string(),
            condition: "good".to_string(),
            location: "Nairobi".to_string(),
            delivery_option: "pickup_only".to_string(),
            original_price: Some(BigDecimal::from(10000)),
            discount_percentage: Some(100),
        };

        assert!(validate_listing_input(&input).is_err());
    }
}
