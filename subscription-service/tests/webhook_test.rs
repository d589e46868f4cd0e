//! Provider webhook endpoint tests.

mod common;

use common::mock_provider::{remote_record, MockProvider};
use common::{unique_email, TestApp, TEST_WEBHOOK_TOKEN};
use serde_json::{json, Value};

const THIRTY_DAYS_MS: i64 = 2_592_000_000;
const APPROVED_MS: i64 = 1_700_000_000_000;

fn approved_payload(email: &str, code: &str, prod: i64) -> Value {
    json!({
        "token": TEST_WEBHOOK_TOKEN,
        "email": email,
        "name": "Ana Souza",
        "phone_local_code": "11",
        "phone_number": "98765-4321",
        "subscriber_code": code,
        "prod": prod,
        "status": "ACTIVE",
        "purchase_date": APPROVED_MS
    })
}

#[tokio::test]
async fn webhook_rejects_an_invalid_token() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let mut payload = approved_payload(&unique_email("ana"), "501", 9);
    payload["token"] = json!("wrong-token");

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_rejects_a_malformed_payload() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let mut payload = approved_payload("not-an-email", "501", 9);
    payload["email"] = json!("not-an-email");

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_surfaces_a_missing_product_as_404() {
    let app = TestApp::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&approved_payload(&unique_email("ana"), "501", 777))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Produto não encontrado");

    // A configuration problem on the live path alerts the operator.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(app.notifier.alert_count(), 1);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_creates_the_subscription() {
    let app = TestApp::spawn().await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    let email = unique_email("ana");
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&approved_payload(&email, "501", 9))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["subscription"]["code"], "501");
    assert_eq!(body["subscription"]["active"], true);

    let row = app.subscription_by_code("501").await.unwrap();
    assert_eq!(row.expiration.timestamp_millis(), APPROVED_MS + THIRTY_DAYS_MS);
    assert!(app.db.find_user_by_email(&email).await.unwrap().is_some());

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_requires_a_subscriber_code_for_activations() {
    let app = TestApp::spawn().await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    let client = reqwest::Client::new();

    let mut payload = approved_payload(&unique_email("ana"), "501", 9);
    payload.as_object_mut().unwrap().remove("subscriber_code");

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_cancellation_status_runs_the_cancellation_sweep() {
    let email = unique_email("ana");
    let mock = MockProvider::builder()
        .subscription_pages(
            &email,
            "CANCELLED_BY_CUSTOMER",
            vec![vec![remote_record("SUB-1", 9, &email, "Ana Souza")]],
        )
        .spawn()
        .await;
    let app = TestApp::spawn_with_provider(&mock.base_url, &mock.token_url).await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;

    // Create the subscription through the webhook first.
    let client = reqwest::Client::new();
    let created = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&approved_payload(&email, "SUB-1", 9))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    let mut payload = approved_payload(&email, "SUB-1", 9);
    payload["status"] = json!("CANCELLED_BY_CUSTOMER");

    let response = client
        .post(format!("{}/webhooks/provider", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cancelled"], 1);

    let row = app.subscription_by_code("SUB-1").await.unwrap();
    assert!(!row.active);

    app.cleanup().await;
}
