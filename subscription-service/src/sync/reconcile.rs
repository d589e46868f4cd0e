//! Reconciliation engine: turns one remote subscription record into a
//! create-or-update against the local subscription table.

use crate::models::{Subscription, UpsertSubscription};
use crate::services::metrics::record_reconcile;
use crate::services::{Database, RemoteSubscription};
use crate::sync::resolver::{NewSubscriber, UserResolver};
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use std::sync::Arc;

/// What to do when the remote record names a product with no local mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingProductPolicy {
    /// Surface the problem to the caller. The interactive webhook path uses
    /// this so an operator notices an unmapped product immediately.
    Fail,
    /// Log and move on. The bulk sweep uses this; one bad record must not
    /// abort a run over thousands of users.
    Skip,
}

/// What to do when an insert loses the unique-code race to another writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Surface as a conflict.
    Reject,
    /// Fetch and return the winning row.
    Absorb,
}

/// Per-caller policy bundle. The webhook and the bulk job run the same
/// reconciliation core and differ only in this.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileMode {
    pub missing_product: MissingProductPolicy,
    pub on_duplicate: DuplicatePolicy,
}

impl ReconcileMode {
    pub fn webhook() -> Self {
        Self {
            missing_product: MissingProductPolicy::Fail,
            on_duplicate: DuplicatePolicy::Reject,
        }
    }

    pub fn bulk() -> Self {
        Self {
            missing_product: MissingProductPolicy::Skip,
            on_duplicate: DuplicatePolicy::Absorb,
        }
    }
}

/// One reconciliation unit: a remote subscription identity plus the most
/// recent approval timestamp from its purchase history.
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub code: String,
    pub email: String,
    pub name: String,
    pub phone_local_code: Option<String>,
    pub phone_number: Option<String>,
    pub product_code: i64,
    pub approved_at: DateTime<Utc>,
}

impl ReconcileInput {
    pub fn from_remote(record: &RemoteSubscription, approved_at: DateTime<Utc>) -> Self {
        let phone = record.subscriber.phone.as_ref();
        Self {
            code: record.subscriber_code.clone(),
            email: record.subscriber.email.clone(),
            name: record.subscriber.name.clone(),
            phone_local_code: phone.and_then(|p| p.local_code.clone()),
            phone_number: phone.and_then(|p| p.number.clone()),
            product_code: record.product.id,
            approved_at,
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
    resolver: UserResolver,
}

impl Reconciler {
    pub fn new(db: Arc<Database>, resolver: UserResolver) -> Self {
        Self { db, resolver }
    }

    /// Reconcile one remote record.
    ///
    /// Returns the persisted subscription, or `Ok(None)` when the mode's
    /// skip policy swallowed a missing product. The expiration is always
    /// recomputed from the approval timestamp, even when nothing else
    /// changed, because a later purchase (plan renewal) moves it;
    /// `registration_date` is set once and survives every re-sync.
    pub async fn reconcile(
        &self,
        input: &ReconcileInput,
        mode: ReconcileMode,
    ) -> Result<Option<Subscription>, AppError> {
        let existing = {
            let mut rows = self.db.find_subscriptions_by_code(&input.code).await?;
            if rows.len() > 1 {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "subscription code {} maps to {} rows",
                    input.code,
                    rows.len()
                )));
            }
            rows.pop()
        };

        let subscriber = NewSubscriber::from_remote(
            &input.email,
            &input.name,
            input.phone_local_code.as_deref(),
            input.phone_number.as_deref(),
        );
        let user = self.resolver.resolve(&subscriber).await?;

        let product = match self.db.find_product_by_code(input.product_code).await? {
            Some(p) => p,
            None => match mode.missing_product {
                MissingProductPolicy::Fail => {
                    return Err(AppError::NotFound(anyhow::anyhow!("Produto não encontrado")));
                }
                MissingProductPolicy::Skip => {
                    tracing::warn!(
                        code = %input.code,
                        product_code = input.product_code,
                        email = %input.email,
                        "No product mapping for remote record, skipping"
                    );
                    record_reconcile("skipped");
                    return Ok(None);
                }
            },
        };

        let expiration = input.approved_at + Duration::milliseconds(product.expiration_ms);
        let row = UpsertSubscription {
            code: Some(input.code.clone()),
            user_id: user.user_id,
            product_id: product.product_id,
            course: product.course.clone(),
            expiration,
            registration_date: existing
                .as_ref()
                .map(|s| s.registration_date)
                .unwrap_or_else(Utc::now),
            active: true,
        };

        let subscription = match existing {
            Some(current) => {
                let updated = self
                    .db
                    .update_subscription(current.subscription_id, &row)
                    .await?;
                record_reconcile("updated");
                updated
            }
            None => match self.db.insert_subscription(&row).await? {
                Some(created) => {
                    record_reconcile("created");
                    created
                }
                // Lost the unique-code race to a concurrent writer.
                None => match mode.on_duplicate {
                    DuplicatePolicy::Reject => {
                        return Err(AppError::Conflict(anyhow::anyhow!(
                            "subscription code {} already exists",
                            input.code
                        )));
                    }
                    DuplicatePolicy::Absorb => {
                        let winner = self
                            .db
                            .find_subscriptions_by_code(&input.code)
                            .await?
                            .into_iter()
                            .next()
                            .ok_or_else(|| {
                                AppError::DatabaseError(anyhow::anyhow!(
                                    "subscription code {} vanished after conflict",
                                    input.code
                                ))
                            })?;
                        record_reconcile("absorbed");
                        winner
                    }
                },
            },
        };

        tracing::info!(
            subscription_id = %subscription.subscription_id,
            code = %input.code,
            email = %input.email,
            expiration = %subscription.expiration,
            "Subscription reconciled"
        );

        Ok(Some(subscription))
    }
}
