//! Cancellation reconciler: mirrors remote cancellations onto local rows.

use crate::models::Subscription;
use crate::services::{Database, ProviderClient, RemoteStatus, SubscriptionFilter};
use futures::{pin_mut, TryStreamExt};
use service_core::error::AppError;
use std::sync::Arc;

pub struct CancellationReconciler {
    db: Arc<Database>,
    provider: Arc<ProviderClient>,
}

impl CancellationReconciler {
    pub fn new(db: Arc<Database>, provider: Arc<ProviderClient>) -> Self {
        Self { db, provider }
    }

    /// Deactivate local subscriptions the provider reports as cancelled for
    /// this subscriber email.
    ///
    /// The list endpoint filters by a single status, so the traversal runs
    /// once per status in `statuses`. Local rows are flagged inactive, never
    /// deleted; codes with no local row are skipped (the provider reports
    /// cancellations for subscriptions that were never created here).
    /// Returns only the rows actually changed, so a second sweep over the
    /// same state reports nothing.
    pub async fn cancel_for_email(
        &self,
        email: &str,
        statuses: &[RemoteStatus],
    ) -> Result<Vec<Subscription>, AppError> {
        let mut changed = Vec::new();

        for status in statuses {
            let records = self.provider.subscriptions(SubscriptionFilter {
                subscriber_email: Some(email.to_string()),
                status: Some(*status),
                product_id: None,
            });
            pin_mut!(records);

            while let Some(record) = records.try_next().await? {
                match self
                    .db
                    .deactivate_subscription_by_code(&record.subscriber_code)
                    .await?
                {
                    Some(subscription) => {
                        tracing::info!(
                            code = %record.subscriber_code,
                            email = %email,
                            remote_status = %status,
                            "Subscription cancelled"
                        );
                        changed.push(subscription);
                    }
                    None => {
                        tracing::debug!(
                            code = %record.subscriber_code,
                            email = %email,
                            "No active local subscription for cancelled code"
                        );
                    }
                }
            }
        }

        Ok(changed)
    }
}
