//! Configuration module for subscription-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Remote billing provider credentials and endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub webhook_token: Secret<String>,
    /// `max_results` sent on every subscription list request.
    pub page_size: i64,
}

/// Pacing knobs for the bulk re-sync job.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_page_size: i64,
    pub page_pause_secs: u64,
    pub error_backoff_secs: u64,
}

impl SyncConfig {
    pub fn page_pause(&self) -> Duration {
        Duration::from_secs(self.page_pause_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub operator_email: String,
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "subscription-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            provider: ProviderConfig {
                base_url: env::var("PROVIDER_BASE_URL")
                    .unwrap_or_else(|_| "https://api.billing.example.com/v1".to_string()),
                token_url: env::var("PROVIDER_TOKEN_URL")
                    .unwrap_or_else(|_| "https://auth.billing.example.com/oauth/token".to_string()),
                client_id: env::var("PROVIDER_CLIENT_ID").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("PROVIDER_CLIENT_ID is required"))
                })?,
                client_secret: Secret::new(env::var("PROVIDER_CLIENT_SECRET").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("PROVIDER_CLIENT_SECRET is required"))
                })?),
                webhook_token: Secret::new(env::var("PROVIDER_WEBHOOK_TOKEN").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("PROVIDER_WEBHOOK_TOKEN is required"))
                })?),
                page_size: env::var("PROVIDER_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(50),
            },
            sync: SyncConfig {
                user_page_size: env::var("SYNC_USER_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(50),
                page_pause_secs: env::var("SYNC_PAGE_PAUSE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
                error_backoff_secs: env::var("SYNC_ERROR_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(180),
            },
            smtp: SmtpConfig {
                enabled: env::var("SMTP_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(false),
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("SMTP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(587),
                user: env::var("SMTP_USER").unwrap_or_default(),
                password: Secret::new(env::var("SMTP_PASSWORD").unwrap_or_default()),
                from_email: env::var("SMTP_FROM_EMAIL")
                    .unwrap_or_else(|_| "no-reply@essaydesk.example.com".to_string()),
                operator_email: env::var("OPERATOR_EMAIL")
                    .unwrap_or_else(|_| "ops@essaydesk.example.com".to_string()),
            },
        })
    }
}
