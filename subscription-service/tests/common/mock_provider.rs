//! In-process mock of the remote billing provider API.
//!
//! Serves the OAuth token endpoint, the paginated subscription list and the
//! purchase history from canned data, and counts requests so tests can
//! assert on the traversal protocol.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Default)]
struct MockState {
    /// Pages keyed by (subscriber_email, status) as sent in the query;
    /// missing filters key as empty strings.
    pages: HashMap<(String, String), Vec<Vec<Value>>>,
    /// Purchase histories keyed by subscriber code.
    purchases: HashMap<String, Vec<Value>>,
    /// Emails whose list requests answer 500.
    fail_emails: HashSet<String>,
    auth_calls: AtomicUsize,
    list_calls: AtomicUsize,
    purchase_calls: AtomicUsize,
}

pub struct MockProvider {
    pub base_url: String,
    pub token_url: String,
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn builder() -> MockProviderBuilder {
        MockProviderBuilder::default()
    }

    pub fn auth_calls(&self) -> usize {
        self.state.auth_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn purchase_calls(&self) -> usize {
        self.state.purchase_calls.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockProviderBuilder {
    state: MockState,
}

impl MockProviderBuilder {
    /// Serve these pages, in order, for a `(subscriber_email, status)` list
    /// filter. Cursors between pages are generated automatically.
    pub fn subscription_pages(
        mut self,
        email: &str,
        status: &str,
        pages: Vec<Vec<Value>>,
    ) -> Self {
        self.state
            .pages
            .insert((email.to_string(), status.to_string()), pages);
        self
    }

    pub fn purchases(mut self, subscriber_code: &str, history: Vec<Value>) -> Self {
        self.state
            .purchases
            .insert(subscriber_code.to_string(), history);
        self
    }

    /// Answer 500 on list requests for this email.
    pub fn fail_for(mut self, email: &str) -> Self {
        self.state.fail_emails.insert(email.to_string());
        self
    }

    pub async fn spawn(self) -> MockProvider {
        let state = Arc::new(self.state);

        let router = Router::new()
            .route("/oauth/token", post(token_handler))
            .route("/api/subscriptions", get(list_handler))
            .route("/api/subscriptions/:code/purchases", get(purchases_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock provider");
        let addr = listener.local_addr().expect("Mock provider local addr");

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        MockProvider {
            base_url: format!("http://{}/api", addr),
            token_url: format!("http://{}/oauth/token", addr),
            state,
        }
    }
}

async fn token_handler(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": "test-token",
        "token_type": "bearer",
        "expires_in": 3600
    }))
}

async fn list_handler(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.list_calls.fetch_add(1, Ordering::SeqCst);

    let email = params
        .get("subscriber_email")
        .cloned()
        .unwrap_or_default();
    let status = params.get("status").cloned().unwrap_or_default();

    if state.fail_emails.contains(&email) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let empty = Vec::new();
    let pages = state
        .pages
        .get(&(email, status))
        .unwrap_or(&empty);

    let idx = params
        .get("page_token")
        .and_then(|t| t.strip_prefix("idx:"))
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0);

    let items = pages.get(idx).cloned().unwrap_or_default();
    let page_info = if idx + 1 < pages.len() {
        json!({ "next_page_token": format!("idx:{}", idx + 1) })
    } else {
        json!({})
    };

    Json(json!({ "items": items, "page_info": page_info })).into_response()
}

async fn purchases_handler(
    State(state): State<Arc<MockState>>,
    Path(code): Path<String>,
) -> Json<Value> {
    state.purchase_calls.fetch_add(1, Ordering::SeqCst);
    let history = state.purchases.get(&code).cloned().unwrap_or_default();
    Json(Value::Array(history))
}

/// A remote subscription record as the provider reports it.
pub fn remote_record(code: &str, product_id: i64, email: &str, name: &str) -> Value {
    json!({
        "subscriber_code": code,
        "subscription_id": 1,
        "status": "ACTIVE",
        "product": { "id": product_id, "name": "Essay Pack" },
        "subscriber": {
            "email": email,
            "name": name,
            "phone": { "local_code": "11", "number": "98765-4321" }
        },
        "trial": false,
        "plan": { "name": "monthly" }
    })
}

pub fn approved_purchase(approved_date: i64) -> Value {
    json!({ "transaction": "TX-1", "approved_date": approved_date, "status": "APPROVED" })
}
