//! Remote billing provider client.
//!
//! Wraps the provider's OAuth token endpoint, the paginated subscription
//! listing and the per-subscriber purchase history behind a reqwest client.
//! The listing is exposed as a lazy stream that hides cursor management;
//! every traversal authenticates once up front.

use crate::config::ProviderConfig;
use crate::services::metrics::record_provider_request;
use futures::stream::{self, Stream, TryStreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::error::AppError;
use std::fmt;

/// Remote subscription status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Active,
    Inactive,
    Delayed,
    Overdue,
    Started,
    CancelledByCustomer,
    CancelledBySeller,
    CancelledByAdmin,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Active => "ACTIVE",
            RemoteStatus::Inactive => "INACTIVE",
            RemoteStatus::Delayed => "DELAYED",
            RemoteStatus::Overdue => "OVERDUE",
            RemoteStatus::Started => "STARTED",
            RemoteStatus::CancelledByCustomer => "CANCELLED_BY_CUSTOMER",
            RemoteStatus::CancelledBySeller => "CANCELLED_BY_SELLER",
            RemoteStatus::CancelledByAdmin => "CANCELLED_BY_ADMIN",
        }
    }

    /// Statuses that mean the subscriber no longer pays: the three
    /// cancellation variants plus INACTIVE.
    pub fn cancellation_family() -> &'static [RemoteStatus] {
        &[
            RemoteStatus::CancelledByCustomer,
            RemoteStatus::CancelledBySeller,
            RemoteStatus::CancelledByAdmin,
            RemoteStatus::Inactive,
        ]
    }

    pub fn is_cancellation(status: &str) -> bool {
        Self::cancellation_family()
            .iter()
            .any(|s| s.as_str() == status)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter for the subscription list endpoint.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub subscriber_email: Option<String>,
    pub status: Option<RemoteStatus>,
    pub product_id: Option<i64>,
}

/// OAuth client-credentials token response.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// One page of the subscription list response.
#[derive(Debug, Deserialize)]
pub struct SubscriptionsPage {
    #[serde(default)]
    pub items: Vec<RemoteSubscription>,
    #[serde(default)]
    pub page_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A subscription entry as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSubscription {
    pub subscriber_code: String,
    #[serde(default)]
    pub subscription_id: Option<i64>,
    pub status: String,
    pub product: RemoteProduct,
    pub subscriber: RemoteSubscriber,
    #[serde(default)]
    pub trial: Option<bool>,
    #[serde(default)]
    pub plan: Option<RemotePlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProduct {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSubscriber {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<RemotePhone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePhone {
    #[serde(default)]
    pub local_code: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePlan {
    #[serde(default)]
    pub name: Option<String>,
}

/// A purchase record from the subscriber's purchase history. The last
/// element of the history is the most recent approval.
#[derive(Debug, Clone, Deserialize)]
pub struct Purchase {
    #[serde(default)]
    pub transaction: Option<String>,
    /// Approval timestamp, epoch milliseconds.
    #[serde(default)]
    pub approved_date: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

struct TraversalState {
    filter: SubscriptionFilter,
    token: Option<String>,
    cursor: Option<String>,
    done: bool,
}

/// Client for the remote billing provider API.
#[derive(Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Fetch a fresh bearer token via the client-credentials grant.
    ///
    /// Tokens are deliberately not cached across traversals; every sync or
    /// cancellation call re-authenticates.
    pub async fn authenticate(&self) -> Result<AccessToken, AppError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            record_provider_request("token", "error");
            tracing::error!(status = %status, "Provider authentication failed");
            return Err(AppError::BadGateway(format!(
                "provider authentication failed: {}",
                status
            )));
        }

        record_provider_request("token", "ok");
        let token: AccessToken = serde_json::from_str(&body).map_err(|e| {
            AppError::BadGateway(format!("malformed token response: {}", e))
        })?;
        Ok(token)
    }

    /// Produce a lazy stream of every subscription matching `filter`.
    ///
    /// One authenticated request per page; the first request carries no
    /// cursor, each subsequent request carries the cursor from the previous
    /// response, and the stream ends when no cursor comes back. An empty
    /// page with a cursor keeps paginating. Any transport or decode error
    /// ends the stream with that error; the traversal never truncates
    /// silently. Each call starts a fresh traversal with its own token.
    pub fn subscriptions(
        &self,
        filter: SubscriptionFilter,
    ) -> impl Stream<Item = Result<RemoteSubscription, AppError>> + '_ {
        let state = TraversalState {
            filter,
            token: None,
            cursor: None,
            done: false,
        };

        stream::try_unfold(state, move |mut state| async move {
            if state.done {
                return Ok::<_, AppError>(None);
            }

            let token = match state.token.clone() {
                Some(t) => t,
                None => {
                    let t = self.authenticate().await?.access_token;
                    state.token = Some(t.clone());
                    t
                }
            };

            let page = self
                .fetch_page(&token, &state.filter, state.cursor.as_deref())
                .await?;

            state.cursor = page.page_info.next_page_token;
            if state.cursor.is_none() {
                state.done = true;
            }

            Ok(Some((page.items, state)))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, AppError>)))
        .try_flatten()
    }

    /// Fetch the purchase history for one subscriber code.
    pub async fn purchases(&self, subscriber_code: &str) -> Result<Vec<Purchase>, AppError> {
        let token = self.authenticate().await?;
        let url = format!(
            "{}/subscriptions/{}/purchases",
            self.config.base_url, subscriber_code
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            record_provider_request("purchases", "error");
            tracing::error!(
                status = %status,
                subscriber_code = %subscriber_code,
                "Purchase history request failed"
            );
            return Err(AppError::BadGateway(format!(
                "purchase history request failed: {}",
                status
            )));
        }

        record_provider_request("purchases", "ok");
        let purchases: Vec<Purchase> = serde_json::from_str(&body).map_err(|e| {
            AppError::BadGateway(format!("malformed purchase history: {}", e))
        })?;
        Ok(purchases)
    }

    async fn fetch_page(
        &self,
        token: &str,
        filter: &SubscriptionFilter,
        page_token: Option<&str>,
    ) -> Result<SubscriptionsPage, AppError> {
        let url = format!("{}/subscriptions", self.config.base_url);

        let mut query: Vec<(&str, String)> =
            vec![("max_results", self.config.page_size.to_string())];
        if let Some(email) = &filter.subscriber_email {
            query.push(("subscriber_email", email.clone()));
        }
        if let Some(status) = filter.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(product_id) = filter.product_id {
            query.push(("product_id", product_id.to_string()));
        }
        if let Some(cursor) = page_token {
            query.push(("page_token", cursor.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Provider subscription page response");

        if !status.is_success() {
            record_provider_request("subscriptions", "error");
            tracing::error!(status = %status, "Subscription list request failed");
            return Err(AppError::BadGateway(format!(
                "subscription list request failed: {}",
                status
            )));
        }

        record_provider_request("subscriptions", "ok");
        let page: SubscriptionsPage = serde_json::from_str(&body).map_err(|e| {
            AppError::BadGateway(format!("malformed subscription page: {}", e))
        })?;
        Ok(page)
    }
}
