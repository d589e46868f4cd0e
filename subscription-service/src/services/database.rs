//! Database service for subscription-service.

use crate::models::{CreateProduct, NewUser, Product, Subscription, UpsertSubscription, User};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Find a user by email.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_email"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, first_name, last_name, phone, password_hash, role, status, created_utc, updated_utc
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    /// Create a new user.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn insert_user(&self, input: &NewUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        let user_id = Uuid::new_v4();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, email, first_name, last_name, phone, password_hash, role, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING user_id, email, first_name, last_name, phone, password_hash, role, status, created_utc, updated_utc
            "#,
        )
        .bind(user_id)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.phone)
        .bind(&input.password_hash)
        .bind(input.role.as_str())
        .bind(input.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)))?;

        timer.observe_duration();
        info!(user_id = %user.user_id, email = %user.email, "User created");

        Ok(user)
    }

    /// Update a user's contact fields from the remote subscriber record.
    ///
    /// The remote source is authoritative for names; the phone is only
    /// replaced when a new one is provided. Resolution always reactivates
    /// the account.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update_user_contact(
        &self,
        user_id: Uuid,
        first_name: &str,
        last_name: &str,
        phone: Option<&str>,
    ) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_user_contact"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET first_name = $2,
                last_name = $3,
                phone = COALESCE($4, phone),
                status = 'active',
                updated_utc = NOW()
            WHERE user_id = $1
            RETURNING user_id, email, first_name, last_name, phone, password_hash, role, status, created_utc, updated_utc
            "#,
        )
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    /// Set a user's role.
    #[instrument(skip(self), fields(user_id = %user_id, role = %role))]
    pub async fn set_user_role(&self, user_id: Uuid, role: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_user_role"])
            .start_timer();

        sqlx::query("UPDATE users SET role = $2, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to set role: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    /// Fetch one keyset page of sync candidates: every account except staff
    /// (admin / corrector), ordered by id.
    #[instrument(skip(self))]
    pub async fn list_sync_candidates(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sync_candidates"])
            .start_timer();

        let users = if let Some(cursor) = after {
            sqlx::query_as::<_, User>(
                r#"
                SELECT user_id, email, first_name, last_name, phone, password_hash, role, status, created_utc, updated_utc
                FROM users
                WHERE role NOT IN ('admin', 'corrector') AND user_id > $1
                ORDER BY user_id
                LIMIT $2
                "#,
            )
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, User>(
                r#"
                SELECT user_id, email, first_name, last_name, phone, password_hash, role, status, created_utc, updated_utc
                FROM users
                WHERE role NOT IN ('admin', 'corrector')
                ORDER BY user_id
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list users: {}", e)))?;

        timer.observe_duration();

        Ok(users)
    }

    // =========================================================================
    // Product Operations
    // =========================================================================

    /// Find a product by its external code.
    #[instrument(skip(self), fields(code = code))]
    pub async fn find_product_by_code(&self, code: i64) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_product_by_code"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, code, name, course, expiration_ms, created_utc
            FROM products
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find product: {}", e)))?;

        timer.observe_duration();

        Ok(product)
    }

    /// Create a product.
    #[instrument(skip(self, input), fields(code = input.code))]
    pub async fn insert_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_product"])
            .start_timer();

        let product_id = Uuid::new_v4();
        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (product_id, code, name, course, expiration_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING product_id, code, name, course, expiration_ms, created_utc
            "#,
        )
        .bind(product_id)
        .bind(input.code)
        .bind(&input.name)
        .bind(&input.course)
        .bind(input.expiration_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create product: {}", e)))?;

        timer.observe_duration();
        info!(product_id = %product.product_id, code = product.code, "Product created");

        Ok(product)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Fetch every subscription carrying this external code.
    ///
    /// The unique constraint keeps this at zero-or-one; the caller treats a
    /// longer result as a data-integrity violation rather than picking one.
    #[instrument(skip(self), fields(code = %code))]
    pub async fn find_subscriptions_by_code(
        &self,
        code: &str,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_subscriptions_by_code"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, code, user_id, product_id, course, expiration, registration_date, active, created_utc, updated_utc
            FROM subscriptions
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// Insert a subscription. Returns `None` when another writer already
    /// holds the code (`ON CONFLICT DO NOTHING`); the caller decides whether
    /// to absorb or reject the race.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn insert_subscription(
        &self,
        input: &UpsertSubscription,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, code, user_id, product_id, course, expiration, registration_date, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (code) DO NOTHING
            RETURNING subscription_id, code, user_id, product_id, course, expiration, registration_date, active, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(&input.code)
        .bind(input.user_id)
        .bind(input.product_id)
        .bind(&input.course)
        .bind(input.expiration)
        .bind(input.registration_date)
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert subscription: {}", e))
        })?;

        timer.observe_duration();
        if let Some(s) = &subscription {
            info!(subscription_id = %s.subscription_id, code = ?s.code, "Subscription created");
        }

        Ok(subscription)
    }

    /// Update a subscription by id. `registration_date` is deliberately not
    /// part of the statement; re-sync never rewrites it.
    #[instrument(skip(self, input), fields(subscription_id = %subscription_id))]
    pub async fn update_subscription(
        &self,
        subscription_id: Uuid,
        input: &UpsertSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET user_id = $2,
                product_id = $3,
                course = $4,
                expiration = $5,
                active = $6,
                updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING subscription_id, code, user_id, product_id, course, expiration, registration_date, active, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(input.user_id)
        .bind(input.product_id)
        .bind(&input.course)
        .bind(input.expiration)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Deactivate the subscription holding this code, if it is still active.
    /// Returns the changed row, or `None` when there was nothing to change
    /// (no local row for the code, or already inactive).
    #[instrument(skip(self), fields(code = %code))]
    pub async fn deactivate_subscription_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_subscription_by_code"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET active = FALSE, updated_utc = NOW()
            WHERE code = $1 AND active = TRUE
            RETURNING subscription_id, code, user_id, product_id, course, expiration, registration_date, active, created_utc, updated_utc
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to deactivate subscription: {}", e))
        })?;

        timer.observe_duration();
        if let Some(s) = &subscription {
            info!(subscription_id = %s.subscription_id, code = %code, "Subscription deactivated");
        }

        Ok(subscription)
    }

    /// Load the reporting working set: every subscription registered on or
    /// before `until`, optionally restricted to one course. Month buckets
    /// are computed in memory by the aggregator, not per-bucket queries.
    #[instrument(skip(self))]
    pub async fn list_subscriptions_registered_before(
        &self,
        until: DateTime<Utc>,
        course: Option<&str>,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions_registered_before"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, code, user_id, product_id, course, expiration, registration_date, active, created_utc, updated_utc
            FROM subscriptions
            WHERE registration_date <= $1 AND ($2::TEXT IS NULL OR course = $2)
            ORDER BY registration_date
            "#,
        )
        .bind(until)
        .bind(course)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load report set: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }
}
