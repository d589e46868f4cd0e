//! Scheduled bulk re-sync entry point.
//!
//! Invoked with no arguments from cron. Sweeps the whole local user base
//! against the remote billing provider, then exits; the sweep is idempotent
//! by subscription code, so rerunning after a crash is always safe.

use service_core::observability::init_tracing;
use std::sync::Arc;
use subscription_service::config::SubscriptionConfig;
use subscription_service::services::{init_metrics, Database, ProviderClient, SmtpNotifier};
use subscription_service::sync::{BulkSynchronizer, Reconciler, SyncPacing, UserResolver};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = SubscriptionConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "subscription-sync-job",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        page_pause_secs = config.sync.page_pause_secs,
        error_backoff_secs = config.sync.error_backoff_secs,
        "Starting bulk subscription sync job"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| std::io::Error::other(format!("Database error: {}", e)))?;
    let db = Arc::new(db);

    let notifier = Arc::new(
        SmtpNotifier::new(&config.smtp)
            .map_err(|e| std::io::Error::other(format!("Notifier error: {}", e)))?,
    );
    let provider = Arc::new(ProviderClient::new(config.provider.clone()));
    let resolver = UserResolver::new(db.clone(), notifier);
    let reconciler = Reconciler::new(db.clone(), resolver);

    let pacing = SyncPacing {
        user_page_size: config.sync.user_page_size,
        page_pause: config.sync.page_pause(),
        error_backoff: config.sync.error_backoff(),
    };
    let synchronizer = BulkSynchronizer::new(db, provider, reconciler, pacing);

    // Let an operator stop a long sweep cleanly between pages.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after current page");
            signal_token.cancel();
        }
    });

    let report = synchronizer
        .run(&cancel)
        .await
        .map_err(|e| std::io::Error::other(format!("Sync job error: {}", e)))?;

    tracing::info!(
        users_processed = report.users_processed,
        synced = report.synced,
        skipped = report.skipped,
        failed_users = report.failed_users,
        "Bulk subscription sync job finished"
    );

    Ok(())
}
