//! Bulk synchronizer integration tests.

mod common;

use common::mock_provider::{approved_purchase, remote_record, MockProvider};
use common::{unique_email, TestApp};
use std::time::Duration;
use subscription_service::sync::{BulkSynchronizer, SyncPacing};
use tokio_util::sync::CancellationToken;

const THIRTY_DAYS_MS: i64 = 2_592_000_000;
const APPROVED_MS: i64 = 1_700_000_000_000;

fn test_pacing(user_page_size: i64) -> SyncPacing {
    SyncPacing {
        user_page_size,
        page_pause: Duration::ZERO,
        error_backoff: Duration::ZERO,
    }
}

fn synchronizer(app: &TestApp, pacing: SyncPacing) -> BulkSynchronizer {
    BulkSynchronizer::new(
        app.db.clone(),
        app.state.provider.clone(),
        (*app.state.reconciler).clone(),
        pacing,
    )
}

#[tokio::test]
async fn one_failing_user_never_takes_down_the_page() {
    let email_a = unique_email("user-a");
    let email_b = unique_email("user-b");
    let email_c = unique_email("user-c");

    let mock = MockProvider::builder()
        .subscription_pages(
            &email_a,
            "ACTIVE",
            vec![vec![remote_record("SUB-A", 9, &email_a, "Ana Souza")]],
        )
        .fail_for(&email_b)
        .subscription_pages(
            &email_c,
            "ACTIVE",
            vec![vec![remote_record("SUB-C", 9, &email_c, "Carla Lima")]],
        )
        .purchases("SUB-A", vec![approved_purchase(APPROVED_MS)])
        .purchases("SUB-C", vec![approved_purchase(APPROVED_MS)])
        .spawn()
        .await;

    let app = TestApp::spawn_with_provider(&mock.base_url, &mock.token_url).await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    app.seed_user(&email_a, "student").await;
    app.seed_user(&email_b, "student").await;
    app.seed_user(&email_c, "student").await;

    // Page size bigger than the user count: all three share one page.
    let report = synchronizer(&app, test_pacing(50))
        .run(&CancellationToken::new())
        .await
        .expect("the run itself succeeds despite the failing user");

    assert_eq!(report.users_processed, 3);
    assert_eq!(report.failed_users, 1);
    assert_eq!(report.synced, 2);

    assert!(app.subscription_by_code("SUB-A").await.is_some());
    assert!(app.subscription_by_code("SUB-C").await.is_some());

    app.cleanup().await;
}

#[tokio::test]
async fn staff_accounts_are_not_sync_candidates() {
    let email_admin = unique_email("admin");
    let email_corrector = unique_email("corrector");
    let email_student = unique_email("student");

    let mock = MockProvider::builder()
        .subscription_pages(
            &email_admin,
            "ACTIVE",
            vec![vec![remote_record("SUB-ADM", 9, &email_admin, "Root Admin")]],
        )
        .subscription_pages(
            &email_corrector,
            "ACTIVE",
            vec![vec![remote_record(
                "SUB-COR",
                9,
                &email_corrector,
                "Carla Corretora",
            )]],
        )
        .subscription_pages(
            &email_student,
            "ACTIVE",
            vec![vec![remote_record("SUB-STU", 9, &email_student, "Ana Souza")]],
        )
        .purchases("SUB-ADM", vec![approved_purchase(APPROVED_MS)])
        .purchases("SUB-COR", vec![approved_purchase(APPROVED_MS)])
        .purchases("SUB-STU", vec![approved_purchase(APPROVED_MS)])
        .spawn()
        .await;

    let app = TestApp::spawn_with_provider(&mock.base_url, &mock.token_url).await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    app.seed_user(&email_admin, "admin").await;
    app.seed_user(&email_corrector, "corrector").await;
    app.seed_user(&email_student, "student").await;

    let report = synchronizer(&app, test_pacing(50))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.users_processed, 1);
    assert!(app.subscription_by_code("SUB-STU").await.is_some());
    assert!(app.subscription_by_code("SUB-ADM").await.is_none());
    assert!(app.subscription_by_code("SUB-COR").await.is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn drifted_roles_are_normalized_to_student() {
    let email = unique_email("legacy");

    let mock = MockProvider::builder()
        .subscription_pages(
            &email,
            "ACTIVE",
            vec![vec![remote_record("SUB-L", 9, &email, "Lia Prado")]],
        )
        .purchases("SUB-L", vec![approved_purchase(APPROVED_MS)])
        .spawn()
        .await;

    let app = TestApp::spawn_with_provider(&mock.base_url, &mock.token_url).await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    app.seed_user(&email, "premium").await;

    synchronizer(&app, test_pacing(50))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let user = app.db.find_user_by_email(&email).await.unwrap().unwrap();
    assert_eq!(user.role, "student");

    app.cleanup().await;
}

#[tokio::test]
async fn rerunning_the_sweep_is_idempotent() {
    let email = unique_email("ana");

    let mock = MockProvider::builder()
        .subscription_pages(
            &email,
            "ACTIVE",
            vec![vec![remote_record("SUB-A", 9, &email, "Ana Souza")]],
        )
        .purchases("SUB-A", vec![approved_purchase(APPROVED_MS)])
        .spawn()
        .await;

    let app = TestApp::spawn_with_provider(&mock.base_url, &mock.token_url).await;
    app.seed_product(9, "essay", THIRTY_DAYS_MS).await;
    app.seed_user(&email, "student").await;

    let sync = synchronizer(&app, test_pacing(50));
    sync.run(&CancellationToken::new()).await.unwrap();
    let first = app.subscription_by_code("SUB-A").await.unwrap();

    sync.run(&CancellationToken::new()).await.unwrap();
    let rows = app.db.find_subscriptions_by_code("SUB-A").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subscription_id, first.subscription_id);
    assert_eq!(rows[0].registration_date, first.registration_date);

    app.cleanup().await;
}

#[tokio::test]
async fn cancelled_token_stops_between_pages() {
    let app = TestApp::spawn().await;
    for i in 0..3 {
        app.seed_user(&unique_email(&format!("user-{}", i)), "student")
            .await;
    }

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = synchronizer(&app, test_pacing(1))
        .run(&cancel)
        .await
        .unwrap();

    assert_eq!(report.users_processed, 0);

    app.cleanup().await;
}
