//! Inbound provider webhook.
//!
//! The interactive convergence path: one event, reconciled immediately, with
//! configuration problems surfaced to the caller instead of logged away.

use crate::models::Subscription;
use crate::services::metrics::record_webhook_event;
use crate::services::RemoteStatus;
use crate::startup::AppState;
use crate::sync::{ReconcileInput, ReconcileMode};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use subtle::ConstantTimeEq;
use validator::Validate;

/// Provider webhook payload. `token` is the shared secret configured at the
/// provider; `prod` is the external product code.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProviderWebhookPayload {
    pub token: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub phone_local_code: Option<String>,
    pub phone_number: Option<String>,
    pub subscriber_code: Option<String>,
    pub prod: i64,
    pub status: String,
    /// Purchase approval timestamp, epoch milliseconds. Absent on some
    /// event kinds; falls back to the event arrival time.
    pub purchase_date: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WebhookResponse {
    Reconciled {
        subscription: Subscription,
    },
    Cancelled {
        cancelled: usize,
        subscriptions: Vec<Subscription>,
    },
}

pub async fn provider_webhook(
    State(state): State<AppState>,
    Json(payload): Json<ProviderWebhookPayload>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let expected = state.config.provider.webhook_token.expose_secret();
    let token_ok: bool = payload
        .token
        .as_bytes()
        .ct_eq(expected.as_bytes())
        .into();
    if !token_ok {
        record_webhook_event("unauthorized");
        tracing::warn!(email = %payload.email, "Webhook with invalid token rejected");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "invalid webhook token"
        )));
    }

    payload.validate()?;

    tracing::info!(
        email = %payload.email,
        status = %payload.status,
        prod = payload.prod,
        "Provider webhook received"
    );

    let result = handle_event(&state, &payload).await;

    match result {
        Ok(response) => {
            record_webhook_event("ok");
            let status = match &response {
                WebhookResponse::Reconciled { .. } => StatusCode::CREATED,
                WebhookResponse::Cancelled { .. } => StatusCode::OK,
            };
            Ok((status, Json(response)))
        }
        Err(e) => {
            record_webhook_event("error");
            notify_operator(&state, &payload, &e);
            Err(e)
        }
    }
}

async fn handle_event(
    state: &AppState,
    payload: &ProviderWebhookPayload,
) -> Result<WebhookResponse, AppError> {
    if RemoteStatus::is_cancellation(&payload.status) {
        let subscriptions = state
            .canceller
            .cancel_for_email(&payload.email, RemoteStatus::cancellation_family())
            .await?;
        return Ok(WebhookResponse::Cancelled {
            cancelled: subscriptions.len(),
            subscriptions,
        });
    }

    let code = payload.subscriber_code.clone().ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("subscriber_code is required for {}", payload.status))
    })?;

    let approved_at = approval_timestamp(payload.purchase_date)?;

    let input = ReconcileInput {
        code,
        email: payload.email.clone(),
        name: payload.name.clone(),
        phone_local_code: payload.phone_local_code.clone(),
        phone_number: payload.phone_number.clone(),
        product_code: payload.prod,
        approved_at,
    };

    let subscription = state
        .reconciler
        .reconcile(&input, ReconcileMode::webhook())
        .await?
        .ok_or_else(|| {
            // Webhook mode never skips; a None here is a logic error.
            AppError::InternalError(anyhow::anyhow!("reconciliation returned no subscription"))
        })?;

    Ok(WebhookResponse::Reconciled { subscription })
}

fn approval_timestamp(purchase_date: Option<i64>) -> Result<DateTime<Utc>, AppError> {
    match purchase_date {
        Some(ms) => Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("invalid purchase_date {}", ms))
        }),
        None => Ok(Utc::now()),
    }
}

/// Configuration problems on the live path must reach a human; fire the
/// alert without holding the response open.
fn notify_operator(state: &AppState, payload: &ProviderWebhookPayload, error: &AppError) {
    let notifier = state.notifier.clone();
    let subject = format!("Webhook reconciliation failed: {}", payload.email);
    let body = format!(
        "error: {}\n\nemail: {}\nname: {}\nstatus: {}\nprod: {}\nsubscriber_code: {:?}\npurchase_date: {:?}",
        error,
        payload.email,
        payload.name,
        payload.status,
        payload.prod,
        payload.subscriber_code,
        payload.purchase_date,
    );
    tokio::spawn(async move {
        if let Err(e) = notifier.send_operator_alert(&subject, &body).await {
            tracing::warn!(error = %e, "Operator alert failed");
        }
    });
}
