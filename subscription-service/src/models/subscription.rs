//! Subscription model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription entity.
///
/// `code` is the provider's subscriber code; unique when present.
/// Subscriptions granted manually by an administrator carry no code and are
/// invisible to the reconciliation engine.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub code: Option<String>,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub course: String,
    pub expiration: DateTime<Utc>,
    /// First-seen timestamp. Set on creation, never touched by re-sync.
    pub registration_date: DateTime<Utc>,
    /// Explicit flag, independent of `expiration`; administrators may
    /// force-deactivate before natural expiry.
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription grants access at `at`.
    pub fn is_current(&self, at: DateTime<Utc>) -> bool {
        self.active && self.expiration > at
    }
}

/// Row payload produced by the reconciliation engine.
#[derive(Debug, Clone)]
pub struct UpsertSubscription {
    pub code: Option<String>,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub course: String,
    pub expiration: DateTime<Utc>,
    /// Only honored on insert; updates leave the stored value untouched.
    pub registration_date: DateTime<Utc>,
    pub active: bool,
}
