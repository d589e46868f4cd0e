//! Cancellation sweep and reporting endpoints.

use crate::models::Subscription;
use crate::services::RemoteStatus;
use crate::startup::AppState;
use crate::sync::report::{default_window, monthly_active_counts, MonthlyCount};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CancellationRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub cancelled: usize,
    pub subscriptions: Vec<Subscription>,
}

/// Manually sweep one subscriber's remote cancellations onto local rows.
pub async fn cancellations(
    State(state): State<AppState>,
    Json(payload): Json<CancellationRequest>,
) -> Result<Json<CancellationResponse>, AppError> {
    payload.validate()?;

    let subscriptions = state
        .canceller
        .cancel_for_email(&payload.email, RemoteStatus::cancellation_family())
        .await?;

    tracing::info!(
        email = %payload.email,
        cancelled = subscriptions.len(),
        "Cancellation sweep applied"
    );

    Ok(Json(CancellationResponse {
        cancelled: subscriptions.len(),
        subscriptions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub course: Option<String>,
}

/// Monthly counts of subscriptions in force over the window (default:
/// trailing 12 months).
pub async fn monthly_report(
    State(state): State<AppState>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<Vec<MonthlyCount>>, AppError> {
    let (default_start, default_end) = default_window(Utc::now());
    let start = params
        .start
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(default_start);
    let end = params
        .end
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(default_end);

    let working_set = state
        .db
        .list_subscriptions_registered_before(end, params.course.as_deref())
        .await?;

    Ok(Json(monthly_active_counts(&working_set, start, end)))
}
