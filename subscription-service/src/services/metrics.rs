//! Metrics module for subscription-service.
//! Provides Prometheus metrics for reconciliation outcomes and provider traffic.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Reconciliation outcomes (created / updated / skipped / absorbed)
pub static RECONCILE_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Bulk sync per-user outcomes (synced / failed)
pub static SYNC_USERS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Requests issued against the remote provider, by endpoint and result
pub static PROVIDER_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Inbound webhook events, by outcome
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    RECONCILE_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_reconcile_total",
                "Total reconciliation outcomes by action"
            ),
            &["action"]
        )
        .expect("Failed to register RECONCILE_TOTAL")
    });

    SYNC_USERS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_sync_users_total",
                "Bulk sync per-user outcomes"
            ),
            &["outcome"]
        )
        .expect("Failed to register SYNC_USERS_TOTAL")
    });

    PROVIDER_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_provider_requests_total",
                "Requests issued against the billing provider"
            ),
            &["endpoint", "status"]
        )
        .expect("Failed to register PROVIDER_REQUESTS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_webhook_events_total",
                "Inbound provider webhook events by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a reconciliation outcome.
pub fn record_reconcile(action: &str) {
    if let Some(counter) = RECONCILE_TOTAL.get() {
        counter.with_label_values(&[action]).inc();
    }
}

/// Record a bulk-sync per-user outcome.
pub fn record_sync_user(outcome: &str) {
    if let Some(counter) = SYNC_USERS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a provider API request.
pub fn record_provider_request(endpoint: &str, status: &str) {
    if let Some(counter) = PROVIDER_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[endpoint, status]).inc();
    }
}

/// Record an inbound webhook event.
pub fn record_webhook_event(outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}
