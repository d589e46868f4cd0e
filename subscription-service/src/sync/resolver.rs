//! User resolution: ties a remote subscriber identity to a local account.

use crate::models::{NewUser, User, UserRole, UserStatus};
use crate::services::{Database, Notifier};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use service_core::error::AppError;
use std::sync::Arc;

/// A subscriber identity as reported by the remote source.
#[derive(Debug, Clone)]
pub struct NewSubscriber {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl NewSubscriber {
    /// Build from the provider's single `name` field plus phone parts.
    pub fn from_remote(
        email: &str,
        full_name: &str,
        local_code: Option<&str>,
        number: Option<&str>,
    ) -> Self {
        let (first_name, last_name) = split_name(full_name);
        Self {
            email: email.to_string(),
            first_name,
            last_name,
            phone: normalize_phone(local_code, number),
        }
    }
}

/// Split a full name into first name and the rest.
pub fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Concatenate local code and number, keeping digits only. Returns `None`
/// when no digits survive, so an absent phone never blanks a stored one.
pub fn normalize_phone(local_code: Option<&str>, number: Option<&str>) -> Option<String> {
    let mut digits = String::new();
    for part in [local_code, number].into_iter().flatten() {
        digits.extend(part.chars().filter(|c| c.is_ascii_digit()));
    }
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn generate_password() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Password hashing failed: {}", e)))
}

/// Get-or-update logic keyed by email. The remote source is authoritative
/// for contact info on every appearance.
#[derive(Clone)]
pub struct UserResolver {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
}

impl UserResolver {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Resolve a remote subscriber to a local account.
    ///
    /// Known email: refresh names and phone (a missing phone never blanks a
    /// stored one), reactivate the account. Unknown email: create a student
    /// account with a random throwaway password and queue the welcome
    /// notification. Notification failures are logged, never propagated.
    pub async fn resolve(&self, subscriber: &NewSubscriber) -> Result<User, AppError> {
        if let Some(existing) = self.db.find_user_by_email(&subscriber.email).await? {
            let updated = self
                .db
                .update_user_contact(
                    existing.user_id,
                    &subscriber.first_name,
                    &subscriber.last_name,
                    subscriber.phone.as_deref(),
                )
                .await?;
            return Ok(updated);
        }

        let password_hash = hash_password(&generate_password())?;
        let user = self
            .db
            .insert_user(&NewUser {
                email: subscriber.email.clone(),
                first_name: subscriber.first_name.clone(),
                last_name: subscriber.last_name.clone(),
                phone: subscriber.phone.clone(),
                password_hash,
                role: UserRole::Student,
                status: UserStatus::Active,
            })
            .await?;

        let notifier = self.notifier.clone();
        let email = user.email.clone();
        let first_name = user.first_name.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_welcome(&email, &first_name).await {
                tracing::warn!(email = %email, error = %e, "Welcome notification failed");
            }
        });

        Ok(user)
    }
}
