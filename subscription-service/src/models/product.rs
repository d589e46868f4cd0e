//! Product model - purchasable course access, mapped from the provider's
//! product catalogue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Product entity. `code` is the identifier the remote provider reports in
/// subscription records; `expiration_ms` is the access window granted by a
/// purchase, in milliseconds.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub code: i64,
    pub name: String,
    pub course: String,
    pub expiration_ms: i64,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub code: i64,
    pub name: String,
    pub course: String,
    pub expiration_ms: i64,
}
