//! Outbound notifications: subscriber onboarding and operator alerts.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Invite a freshly created account to set its credentials. The random
    /// password generated at creation is never sent anywhere; this mail
    /// carries a set-password entry point instead.
    async fn send_welcome(&self, to_email: &str, first_name: &str) -> Result<(), AppError>;

    /// Alert the operator address with a raw error and the payload that
    /// produced it.
    async fn send_operator_alert(&self, subject: &str, body: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
    operator_email: String,
    enabled: bool,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.expose_secret().clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::EmailError(format!("Failed to create SMTP relay: {}", e)))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        if config.enabled {
            tracing::info!(host = %config.host, "SMTP notifier initialized");
        } else {
            tracing::info!("SMTP notifier disabled by configuration");
        }

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
            operator_email: config.operator_email.clone(),
            enabled: config.enabled,
        })
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if !self.enabled {
            tracing::debug!(to = %to_email, subject = %subject, "SMTP disabled, dropping email");
            return Ok(());
        }

        let email = Message::builder()
            .from(self
                .from_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        // Send in the blocking pool; lettre's sync transport would stall the runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_welcome(&self, to_email: &str, first_name: &str) -> Result<(), AppError> {
        let body = format!(
            "Olá {},\n\nSua assinatura foi ativada. Acesse a plataforma e defina \
             sua senha para começar a enviar redações.\n\nEquipe essaydesk",
            first_name
        );
        self.send_email(to_email, "Bem-vindo à plataforma", &body).await
    }

    async fn send_operator_alert(&self, subject: &str, body: &str) -> Result<(), AppError> {
        let operator = self.operator_email.clone();
        self.send_email(&operator, subject, body).await
    }
}

/// Mock notifier for testing.
pub struct MockNotifier {
    welcome_count: AtomicU64,
    alert_count: AtomicU64,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            welcome_count: AtomicU64::new(0),
            alert_count: AtomicU64::new(0),
        }
    }

    pub fn welcome_count(&self) -> u64 {
        self.welcome_count.load(Ordering::SeqCst)
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::SeqCst)
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_welcome(&self, to_email: &str, _first_name: &str) -> Result<(), AppError> {
        self.welcome_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(to = %to_email, "[MOCK] Welcome email would be sent");
        Ok(())
    }

    async fn send_operator_alert(&self, subject: &str, _body: &str) -> Result<(), AppError> {
        self.alert_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(subject = %subject, "[MOCK] Operator alert would be sent");
        Ok(())
    }
}
