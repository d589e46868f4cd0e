//! Services module for subscription-service.

pub mod database;
pub mod email;
pub mod metrics;
pub mod provider;

pub use database::Database;
pub use email::{MockNotifier, Notifier, SmtpNotifier};
pub use metrics::{
    get_metrics, init_metrics, record_provider_request, record_reconcile, record_sync_user,
    record_webhook_event,
};
pub use provider::{
    Purchase, ProviderClient, RemotePhone, RemoteProduct, RemoteStatus, RemoteSubscriber,
    RemoteSubscription, SubscriptionFilter,
};
