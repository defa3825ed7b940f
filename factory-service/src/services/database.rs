//! PostgreSQL access for the factory service.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::dtos::product::{CreateProductPlanRequest, UpdateProductPlanRequest};
use crate::models::user::{ACCOUNT_DELETION_GRACE_DAYS, MAX_PASSWORD_TRIES};
use crate::models::{
    CreateFile, CreateTransaction, CreateUserSubscription, ProductPlan, ProductPlanFilter,
    StoredFile, SubscriptionFilter, Transaction, TransactionStatus, User, UserRole,
    UserSubscription,
};
use crate::services::metrics::{record_tokens_credited, QueryTimer};
use crate::services::store::PaymentStore;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, tokens, email_verified, \
    password_tries, account_blocked, account_suspended, account_deleted, marked_for_deletion, \
    delete_account_after, created_at, updated_at";

const PLAN_COLUMNS: &str = "id, plan_name, plan_description, plan_price, plan_currency, \
    plan_duration_days, plan_type, tokens, billing_cycles, is_active, features, \
    payment_gateway_ids, updated_by, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, product_plan_id, tokens, amount, currency, \
    status, payment_gateway_name, gateway_transaction_id, gateway_redirect_url, receipt_id, \
    created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, product_plan_id, subscription_id, \
    payment_gateway_name, status, is_active, start_date, end_date, charged_count, \
    total_charged_count, suspended, created_at, updated_at";

const FILE_COLUMNS: &str =
    "id, user_id, file_name, content_type, size_bytes, storage_key, created_at";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "factory-service"))]
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
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }

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

    #[instrument(skip(self, password_hash), fields(email = %email))]
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User, AppError> {
        let timer = QueryTimer::start("create_user");

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, password_hash, role) \
             VALUES ($1, $2, LOWER($3), $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Email is already registered"))
            }
            e => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();
        info!(user_id = %user.id, "User created");

        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get user"))
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get user by email"))
    }

    /// Count a wrong password and block the account once the limit is hit.
    #[instrument(skip(self))]
    pub async fn record_failed_login(&self, user_id: Uuid) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password_tries = password_tries + 1, \
             account_blocked = account_blocked OR password_tries + 1 >= $2, \
             updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(MAX_PASSWORD_TRIES)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to record failed login"))
    }

    #[instrument(skip(self))]
    pub async fn reset_password_tries(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_tries = 0, updated_at = NOW() \
             WHERE id = $1 AND password_tries <> 0",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to reset password tries"))?;
        Ok(())
    }

    #[instrument(skip(self, password_hash))]
    pub async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET password_hash = $2, password_tries = 0, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update password"))?;
        Ok(())
    }

    /// Flag the account for removal after the grace period.
    #[instrument(skip(self))]
    pub async fn mark_for_deletion(&self, user_id: Uuid) -> Result<User, AppError> {
        let delete_after = Utc::now() + ChronoDuration::days(ACCOUNT_DELETION_GRACE_DAYS);

        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET marked_for_deletion = TRUE, delete_account_after = $2, \
             updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(delete_after)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to mark account for deletion"))
    }

    #[instrument(skip(self))]
    pub async fn clear_deletion_mark(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET marked_for_deletion = FALSE, delete_account_after = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to clear deletion mark"))?;
        Ok(())
    }

    /// Create the administrator account, or promote it if it already exists.
    #[instrument(skip(self, password_hash), fields(email = %email))]
    pub async fn ensure_admin(&self, email: &str, password_hash: &str) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, password_hash, role, email_verified) \
             VALUES ($1, 'Administrator', LOWER($2), $3, 'admin', TRUE) \
             ON CONFLICT (LOWER(email)) DO UPDATE SET role = 'admin', updated_at = NOW() \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to ensure admin user"))?;

        info!(user_id = %user.id, "Administrator account ensured");
        Ok(user)
    }

    // =========================================================================
    // Product Plan Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(plan_name = %input.plan_name))]
    pub async fn create_plan(
        &self,
        input: &CreateProductPlanRequest,
        updated_by: Uuid,
    ) -> Result<ProductPlan, AppError> {
        let timer = QueryTimer::start("create_plan");

        let plan = sqlx::query_as::<_, ProductPlan>(&format!(
            "INSERT INTO product_plans (id, plan_name, plan_description, plan_price, \
             plan_currency, plan_duration_days, plan_type, tokens, billing_cycles, is_active, \
             features, payment_gateway_ids, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&input.plan_name)
        .bind(&input.plan_description)
        .bind(input.plan_price)
        .bind(input.plan_currency.as_str())
        .bind(input.plan_duration_days)
        .bind(input.plan_type.as_str())
        .bind(input.tokens)
        .bind(input.billing_cycles.unwrap_or(1))
        .bind(input.is_active.unwrap_or(true))
        .bind(Json(&input.features))
        .bind(Json(&input.payment_gateway_ids))
        .bind(updated_by)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create plan"))?;

        timer.observe_duration();
        info!(plan_id = %plan.id, "Plan created");

        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<ProductPlan>, AppError> {
        sqlx::query_as::<_, ProductPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM product_plans WHERE id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get plan"))
    }

    #[instrument(skip(self))]
    pub async fn list_plans(&self, filter: &ProductPlanFilter) -> Result<Vec<ProductPlan>, AppError> {
        let timer = QueryTimer::start("list_plans");

        // Sort column and direction come from closed enums, never from input text.
        let plans = sqlx::query_as::<_, ProductPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM product_plans \
             WHERE ($1::varchar IS NULL OR plan_type = $1) \
               AND ($2::boolean IS NULL OR is_active = $2) \
               AND ($3::varchar IS NULL OR plan_currency = $3) \
             ORDER BY {} {}, id \
             OFFSET $4 LIMIT $5",
            filter.sort_by.column(),
            filter.sort_order.as_sql(),
        ))
        .bind(filter.plan_type.map(|t| t.as_str()))
        .bind(filter.is_active)
        .bind(filter.plan_currency.map(|c| c.as_str()))
        .bind(filter.start.max(0))
        .bind(filter.limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list plans"))?;

        timer.observe_duration();

        Ok(plans)
    }

    #[instrument(skip(self, input))]
    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdateProductPlanRequest,
        updated_by: Uuid,
    ) -> Result<Option<ProductPlan>, AppError> {
        let timer = QueryTimer::start("update_plan");

        let plan = sqlx::query_as::<_, ProductPlan>(&format!(
            "UPDATE product_plans SET \
               plan_name = COALESCE($2, plan_name), \
               plan_description = COALESCE($3, plan_description), \
               plan_price = COALESCE($4, plan_price), \
               plan_currency = COALESCE($5, plan_currency), \
               plan_duration_days = COALESCE($6, plan_duration_days), \
               plan_type = COALESCE($7, plan_type), \
               tokens = COALESCE($8, tokens), \
               billing_cycles = COALESCE($9, billing_cycles), \
               is_active = COALESCE($10, is_active), \
               features = COALESCE($11, features), \
               payment_gateway_ids = COALESCE($12, payment_gateway_ids), \
               updated_by = $13, \
               updated_at = NOW() \
             WHERE id = $1 RETURNING {PLAN_COLUMNS}"
        ))
        .bind(plan_id)
        .bind(&input.plan_name)
        .bind(&input.plan_description)
        .bind(input.plan_price)
        .bind(input.plan_currency.map(|c| c.as_str()))
        .bind(input.plan_duration_days)
        .bind(input.plan_type.map(|t| t.as_str()))
        .bind(input.tokens)
        .bind(input.billing_cycles)
        .bind(input.is_active)
        .bind(input.features.as_ref().map(Json))
        .bind(input.payment_gateway_ids.as_ref().map(Json))
        .bind(updated_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to update plan"))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn delete_plan(&self, plan_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM product_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Plan has subscriptions; deactivate it instead"
                    ))
                }
                e => AppError::DatabaseError(anyhow::anyhow!("Failed to delete plan: {}", e)),
            })?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Transaction & Subscription Listings
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn list_user_transactions(
        &self,
        user_id: Uuid,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id OFFSET $2 LIMIT $3"
        ))
        .bind(user_id)
        .bind(start.max(0))
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list transactions"))
    }

    #[instrument(skip(self))]
    pub async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<UserSubscription>, AppError> {
        let timer = QueryTimer::start("list_subscriptions");

        let subscriptions = sqlx::query_as::<_, UserSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
               AND ($2::uuid IS NULL OR product_plan_id = $2) \
               AND ($3::varchar IS NULL OR status = $3) \
               AND ($4::boolean IS NULL OR is_active = $4) \
               AND ($5::integer IS NULL OR charged_count >= $5) \
               AND ($6::integer IS NULL OR charged_count <= $6) \
               AND ($7::timestamptz IS NULL OR created_at >= $7) \
               AND ($8::timestamptz IS NULL OR created_at <= $8) \
             ORDER BY created_at DESC, id \
             OFFSET $9 LIMIT $10"
        ))
        .bind(filter.user_id)
        .bind(filter.product_plan_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.is_active)
        .bind(filter.min_charged_count)
        .bind(filter.max_charged_count)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(filter.start.max(0))
        .bind(filter.limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list subscriptions"))?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_file(&self, input: &CreateFile) -> Result<StoredFile, AppError> {
        sqlx::query_as::<_, StoredFile>(&format!(
            "INSERT INTO files (id, user_id, file_name, content_type, size_bytes, storage_key) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {FILE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.file_name)
        .bind(&input.content_type)
        .bind(input.size_bytes)
        .bind(&input.storage_key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create file"))
    }

    #[instrument(skip(self))]
    pub async fn list_files(
        &self,
        user_id: Uuid,
        start: i64,
        limit: i64,
    ) -> Result<Vec<StoredFile>, AppError> {
        sqlx::query_as::<_, StoredFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE user_id = $1 \
             ORDER BY created_at DESC, id OFFSET $2 LIMIT $3"
        ))
        .bind(user_id)
        .bind(start.max(0))
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list files"))
    }

    #[instrument(skip(self))]
    pub async fn get_file(&self, user_id: Uuid, file_id: Uuid) -> Result<Option<StoredFile>, AppError> {
        sqlx::query_as::<_, StoredFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = $1 AND user_id = $2"
        ))
        .bind(file_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get file"))
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, user_id: Uuid, file_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1 AND user_id = $2")
            .bind(file_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete file"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PaymentStore for Database {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<ProductPlan>, AppError> {
        self.get_plan(plan_id).await
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    async fn create_transaction(&self, input: &CreateTransaction) -> Result<Transaction, AppError> {
        let timer = QueryTimer::start("create_transaction");

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions (id, user_id, product_plan_id, tokens, amount, currency, \
             status, payment_gateway_name, gateway_transaction_id, gateway_redirect_url, receipt_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(input.id)
        .bind(input.user_id)
        .bind(input.product_plan_id)
        .bind(input.tokens)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.status.as_str())
        .bind(&input.payment_gateway_name)
        .bind(&input.gateway_transaction_id)
        .bind(&input.gateway_redirect_url)
        .bind(input.receipt_id())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create transaction"))?;

        timer.observe_duration();

        Ok(transaction)
    }

    #[instrument(skip(self, redirect_url))]
    async fn attach_gateway_reference(
        &self,
        transaction_id: Uuid,
        gateway_transaction_id: &str,
        redirect_url: Option<&str>,
    ) -> Result<Transaction, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET gateway_transaction_id = $2, \
             gateway_redirect_url = COALESCE($3, gateway_redirect_url), updated_at = NOW() \
             WHERE id = $1 RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(transaction_id)
        .bind(gateway_transaction_id)
        .bind(redirect_url)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to attach gateway reference"))
    }

    #[instrument(skip(self))]
    async fn find_transaction_by_gateway_id(
        &self,
        gateway: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE payment_gateway_name = $1 AND gateway_transaction_id = $2"
        ))
        .bind(gateway)
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find transaction"))
    }

    #[instrument(skip(self))]
    async fn complete_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = QueryTimer::start("complete_transaction");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        // The row lock taken here makes a concurrent duplicate wait, then see
        // status = 'completed' and update nothing.
        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET status = $2, gateway_redirect_url = NULL, updated_at = NOW() \
             WHERE id = $1 AND status <> $2 RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(transaction_id)
        .bind(TransactionStatus::Completed.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to complete transaction"))?;

        if let Some(ref transaction) = transaction {
            credit_tokens(&mut tx, transaction.user_id, transaction.tokens).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        timer.observe_duration();

        if let Some(ref transaction) = transaction {
            record_tokens_credited(transaction.tokens);
        }

        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn fail_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET status = $2, gateway_redirect_url = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = $3 RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(transaction_id)
        .bind(TransactionStatus::Failed.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to mark transaction failed"))
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    async fn record_completed_transaction(
        &self,
        input: &CreateTransaction,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = QueryTimer::start("record_completed_transaction");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions (id, user_id, product_plan_id, tokens, amount, currency, \
             status, payment_gateway_name, gateway_transaction_id, gateway_redirect_url, receipt_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10) \
             ON CONFLICT (payment_gateway_name, gateway_transaction_id) \
               WHERE gateway_transaction_id IS NOT NULL DO NOTHING \
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(input.id)
        .bind(input.user_id)
        .bind(input.product_plan_id)
        .bind(input.tokens)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(TransactionStatus::Completed.as_str())
        .bind(&input.payment_gateway_name)
        .bind(&input.gateway_transaction_id)
        .bind(input.receipt_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to record completed transaction"))?;

        if let Some(ref transaction) = transaction {
            credit_tokens(&mut tx, transaction.user_id, transaction.tokens).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;
        timer.observe_duration();

        if let Some(ref transaction) = transaction {
            record_tokens_credited(transaction.tokens);
        }

        Ok(transaction)
    }

    #[instrument(skip(self, input), fields(subscription_id = %input.subscription_id))]
    async fn create_subscription(
        &self,
        input: &CreateUserSubscription,
    ) -> Result<UserSubscription, AppError> {
        sqlx::query_as::<_, UserSubscription>(&format!(
            "INSERT INTO user_subscriptions (id, user_id, product_plan_id, subscription_id, \
             payment_gateway_name, status, is_active, start_date, end_date, charged_count, \
             total_charged_count) \
             VALUES ($1, $2, $3, $4, $5, 'pending', FALSE, $6, $7, $8, $9) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.product_plan_id)
        .bind(&input.subscription_id)
        .bind(&input.payment_gateway_name)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.charged_count)
        .bind(input.total_charged_count)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create subscription"))
    }

    #[instrument(skip(self))]
    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        sqlx::query_as::<_, UserSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find subscription"))
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn update_subscription(
        &self,
        subscription: &UserSubscription,
    ) -> Result<UserSubscription, AppError> {
        sqlx::query_as::<_, UserSubscription>(&format!(
            "UPDATE user_subscriptions SET status = $2, is_active = $3, start_date = $4, \
             end_date = $5, charged_count = $6, total_charged_count = $7, suspended = $8, \
             updated_at = NOW() \
             WHERE id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription.id)
        .bind(&subscription.status)
        .bind(subscription.is_active)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.charged_count)
        .bind(subscription.total_charged_count)
        .bind(subscription.suspended)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to update subscription"))
    }

    async fn has_webhook_event(&self, event_id: &str) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to look up webhook event"))
    }

    async fn record_webhook_event(
        &self,
        event_id: &str,
        gateway: &str,
        event_type: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (event_id, gateway, event_type) VALUES ($1, $2, $3) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(gateway)
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to record webhook event"))?;

        Ok(result.rows_affected() == 1)
    }
}

async fn credit_tokens(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    tokens: i64,
) -> Result<(), AppError> {
    if tokens == 0 {
        return Ok(());
    }

    let result = sqlx::query(
        "UPDATE users SET tokens = tokens + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .bind(tokens)
    .execute(&mut **tx)
    .await
    .map_err(db_error("Failed to credit tokens"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::DatabaseError(anyhow::anyhow!(
            "Cannot credit tokens: user {} not found",
            user_id
        )));
    }

    info!(user_id = %user_id, tokens, "Tokens credited");
    Ok(())
}
