//! User model - platform accounts tied to remote subscriber identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account roles. Only students (and drifted unknown roles) are
/// subscription candidates; staff roles never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Corrector,
    Student,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Corrector => "corrector",
            UserRole::Student => "student",
        }
    }

    /// Staff accounts are excluded from subscription synchronization.
    pub fn is_staff(role: &str) -> bool {
        role == UserRole::Admin.as_str() || role == UserRole::Corrector.as_str()
    }
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Pending => "pending",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "inactive" => UserStatus::Inactive,
            "pending" => UserStatus::Pending,
            _ => UserStatus::Active,
        }
    }
}

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Digits only (local code + number).
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: UserRole,
    pub status: UserStatus,
}
