//! Bulk synchronizer: sweeps the whole user base against the remote source.
//!
//! Local users are paged strictly sequentially; inside a page, per-user work
//! fans out concurrently with each user's failure contained to that user.
//! Fixed pauses between pages (and after failures) keep the sweep under the
//! provider's rate limit across runs that touch tens of thousands of
//! accounts. The job holds no run-level state: reconciliation is idempotent
//! by code, so a crashed or cancelled sweep is simply re-run from the start.

use crate::models::{User, UserRole};
use crate::services::metrics::record_sync_user;
use crate::services::{Database, ProviderClient, RemoteStatus, SubscriptionFilter};
use crate::sync::reconcile::{ReconcileInput, ReconcileMode, Reconciler};
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use futures::{pin_mut, TryStreamExt};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pacing knobs. Tests shrink these to zero; production values come from
/// `SyncConfig`.
#[derive(Debug, Clone)]
pub struct SyncPacing {
    pub user_page_size: i64,
    /// Pause after every page of local users.
    pub page_pause: Duration,
    /// Pause after each failed user; an unexpected failure is read as a
    /// sign the remote API is rate-limiting or degraded.
    pub error_backoff: Duration,
}

impl Default for SyncPacing {
    fn default() -> Self {
        Self {
            user_page_size: 50,
            page_pause: Duration::from_secs(90),
            error_backoff: Duration::from_secs(180),
        }
    }
}

/// Aggregated outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub users_processed: u64,
    pub synced: u64,
    pub skipped: u64,
    pub failed_users: u64,
}

#[derive(Debug, Default)]
struct UserCounts {
    synced: u64,
    skipped: u64,
}

pub struct BulkSynchronizer {
    db: Arc<Database>,
    provider: Arc<ProviderClient>,
    reconciler: Reconciler,
    pacing: SyncPacing,
}

impl BulkSynchronizer {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<ProviderClient>,
        reconciler: Reconciler,
        pacing: SyncPacing,
    ) -> Self {
        Self {
            db,
            provider,
            reconciler,
            pacing,
        }
    }

    /// Run the sweep to completion, or until `cancel` fires. Cancellation is
    /// only observed between suspension points, so a page in flight settles
    /// before the job stops; state is never left half-written.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, AppError> {
        let mut report = SyncReport::default();
        let mut after: Option<Uuid> = None;

        tracing::info!(
            page_size = self.pacing.user_page_size,
            "Starting bulk subscription sync"
        );

        'pages: loop {
            if cancel.is_cancelled() {
                tracing::info!("Bulk sync cancelled between pages");
                break;
            }

            let page = self
                .db
                .list_sync_candidates(after, self.pacing.user_page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            after = page.last().map(|u| u.user_id);

            let outcomes = join_all(page.iter().map(|user| self.sync_user(user))).await;

            for (user, outcome) in page.iter().zip(outcomes) {
                report.users_processed += 1;
                match outcome {
                    Ok(counts) => {
                        report.synced += counts.synced;
                        report.skipped += counts.skipped;
                        record_sync_user("synced");
                    }
                    Err(e) => {
                        report.failed_users += 1;
                        record_sync_user("failed");
                        tracing::error!(
                            email = %user.email,
                            error = %e,
                            "User sync failed, backing off"
                        );
                        if !pause(cancel, self.pacing.error_backoff).await {
                            break 'pages;
                        }
                    }
                }
            }

            tracing::info!(
                users_processed = report.users_processed,
                synced = report.synced,
                skipped = report.skipped,
                failed_users = report.failed_users,
                "Sync page settled, pausing before next page"
            );

            if !pause(cancel, self.pacing.page_pause).await {
                break;
            }
        }

        tracing::info!(
            users_processed = report.users_processed,
            synced = report.synced,
            skipped = report.skipped,
            failed_users = report.failed_users,
            "Bulk subscription sync finished"
        );

        Ok(report)
    }

    /// Reconcile every active remote subscription of one user. Errors abort
    /// only this user; the caller contains them.
    async fn sync_user(&self, user: &User) -> Result<UserCounts, AppError> {
        let mut counts = UserCounts::default();

        let records = self.provider.subscriptions(SubscriptionFilter {
            subscriber_email: Some(user.email.clone()),
            status: Some(RemoteStatus::Active),
            product_id: None,
        });
        pin_mut!(records);

        while let Some(record) = records.try_next().await? {
            let purchases = self.provider.purchases(&record.subscriber_code).await?;
            let Some(approved_ms) = purchases.last().and_then(|p| p.approved_date) else {
                tracing::warn!(
                    subscriber_code = %record.subscriber_code,
                    email = %user.email,
                    "No approved purchase in history, skipping record"
                );
                counts.skipped += 1;
                continue;
            };
            let approved_at = Utc
                .timestamp_millis_opt(approved_ms)
                .single()
                .ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!(
                        "invalid approval timestamp {} for {}",
                        approved_ms,
                        record.subscriber_code
                    ))
                })?;

            let input = ReconcileInput::from_remote(&record, approved_at);
            match self.reconciler.reconcile(&input, ReconcileMode::bulk()).await? {
                Some(_) => counts.synced += 1,
                None => counts.skipped += 1,
            }
        }

        // Historical data drift: non-staff accounts occasionally carry stray
        // roles; coerce them back to student once the sync confirms them.
        if !UserRole::is_staff(&user.role) && user.role != UserRole::Student.as_str() {
            self.db
                .set_user_role(user.user_id, UserRole::Student.as_str())
                .await?;
            tracing::info!(email = %user.email, old_role = %user.role, "Normalized user role");
        }

        Ok(counts)
    }
}

/// Sleep unless cancelled first. Returns `false` when the sweep should stop.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
