//! Page traversal tests against the in-process mock provider.

mod common;

use common::mock_provider::{remote_record, MockProvider};
use futures::TryStreamExt;
use secrecy::Secret;
use service_core::error::AppError;
use subscription_service::config::ProviderConfig;
use subscription_service::services::{ProviderClient, RemoteStatus, SubscriptionFilter};

fn client_for(mock: &MockProvider) -> ProviderClient {
    ProviderClient::new(ProviderConfig {
        base_url: mock.base_url.clone(),
        token_url: mock.token_url.clone(),
        client_id: "test-client".to_string(),
        client_secret: Secret::new("test-secret".to_string()),
        webhook_token: Secret::new("unused".to_string()),
        page_size: 2,
    })
}

fn active_filter(email: &str) -> SubscriptionFilter {
    SubscriptionFilter {
        subscriber_email: Some(email.to_string()),
        status: Some(RemoteStatus::Active),
        product_id: None,
    }
}

#[tokio::test]
async fn traversal_yields_every_record_in_order() {
    let mock = MockProvider::builder()
        .subscription_pages(
            "a@x.com",
            "ACTIVE",
            vec![
                vec![
                    remote_record("SUB-1", 9, "a@x.com", "Ana Souza"),
                    remote_record("SUB-2", 9, "a@x.com", "Ana Souza"),
                ],
                vec![
                    remote_record("SUB-3", 9, "a@x.com", "Ana Souza"),
                    remote_record("SUB-4", 9, "a@x.com", "Ana Souza"),
                ],
                vec![
                    remote_record("SUB-5", 9, "a@x.com", "Ana Souza"),
                    remote_record("SUB-6", 9, "a@x.com", "Ana Souza"),
                ],
            ],
        )
        .spawn()
        .await;
    let client = client_for(&mock);

    let records: Vec<_> = client
        .subscriptions(active_filter("a@x.com"))
        .try_collect()
        .await
        .expect("traversal should succeed");

    let codes: Vec<_> = records.iter().map(|r| r.subscriber_code.as_str()).collect();
    assert_eq!(codes, vec!["SUB-1", "SUB-2", "SUB-3", "SUB-4", "SUB-5", "SUB-6"]);

    // One list request per page, one token request per traversal.
    assert_eq!(mock.list_calls(), 3);
    assert_eq!(mock.auth_calls(), 1);
}

#[tokio::test]
async fn traversal_continues_through_empty_intermediate_pages() {
    let mock = MockProvider::builder()
        .subscription_pages(
            "a@x.com",
            "ACTIVE",
            vec![
                vec![remote_record("SUB-1", 9, "a@x.com", "Ana Souza")],
                vec![],
                vec![remote_record("SUB-2", 9, "a@x.com", "Ana Souza")],
            ],
        )
        .spawn()
        .await;
    let client = client_for(&mock);

    let records: Vec<_> = client
        .subscriptions(active_filter("a@x.com"))
        .try_collect()
        .await
        .expect("traversal should succeed");

    assert_eq!(records.len(), 2);
    assert_eq!(mock.list_calls(), 3);
}

#[tokio::test]
async fn traversal_with_no_records_ends_normally() {
    let mock = MockProvider::builder().spawn().await;
    let client = client_for(&mock);

    let records: Vec<_> = client
        .subscriptions(active_filter("nobody@x.com"))
        .try_collect()
        .await
        .expect("zero records is not an error");

    assert!(records.is_empty());
    assert_eq!(mock.list_calls(), 1);
}

#[tokio::test]
async fn each_traversal_authenticates_once() {
    let mock = MockProvider::builder()
        .subscription_pages(
            "a@x.com",
            "ACTIVE",
            vec![vec![remote_record("SUB-1", 9, "a@x.com", "Ana Souza")]],
        )
        .spawn()
        .await;
    let client = client_for(&mock);

    for _ in 0..2 {
        let _: Vec<_> = client
            .subscriptions(active_filter("a@x.com"))
            .try_collect()
            .await
            .expect("traversal should succeed");
    }

    // Restartable per call: every traversal fetches a fresh token.
    assert_eq!(mock.auth_calls(), 2);
    assert_eq!(mock.list_calls(), 2);
}

#[tokio::test]
async fn transport_error_aborts_the_traversal() {
    let mock = MockProvider::builder().fail_for("a@x.com").spawn().await;
    let client = client_for(&mock);

    let result: Result<Vec<_>, _> = client
        .subscriptions(active_filter("a@x.com"))
        .try_collect()
        .await;

    assert!(matches!(result, Err(AppError::BadGateway(_))));
}
