//! Persistence operations the payment gateway depends on.
//!
//! The state transitions that move tokens are single atomic operations here,
//! so duplicate or concurrent webhook deliveries can credit a user at most
//! once.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    CreateTransaction, CreateUserSubscription, ProductPlan, Transaction, UserSubscription,
};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<ProductPlan>, AppError>;

    async fn create_transaction(&self, input: &CreateTransaction)
        -> Result<Transaction, AppError>;

    /// Attach the gateway's order or subscription id (and checkout URL) to a
    /// freshly created transaction.
    async fn attach_gateway_reference(
        &self,
        transaction_id: Uuid,
        gateway_transaction_id: &str,
        redirect_url: Option<&str>,
    ) -> Result<Transaction, AppError>;

    async fn find_transaction_by_gateway_id(
        &self,
        gateway: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, AppError>;

    /// Move a pending or failed transaction to completed and credit its tokens
    /// to the owner, atomically. Returns `None` when it was already completed.
    async fn complete_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError>;

    /// Move a pending transaction to failed. Returns `None` when it was not
    /// pending.
    async fn fail_transaction(&self, transaction_id: Uuid)
        -> Result<Option<Transaction>, AppError>;

    /// Insert a completed transaction and credit its tokens, unless one with
    /// the same gateway id already exists. Returns `None` for a duplicate.
    async fn record_completed_transaction(
        &self,
        input: &CreateTransaction,
    ) -> Result<Option<Transaction>, AppError>;

    async fn create_subscription(
        &self,
        input: &CreateUserSubscription,
    ) -> Result<UserSubscription, AppError>;

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError>;

    async fn update_subscription(
        &self,
        subscription: &UserSubscription,
    ) -> Result<UserSubscription, AppError>;

    async fn has_webhook_event(&self, event_id: &str) -> Result<bool, AppError>;

    /// Returns `false` when the event id was already recorded.
    async fn record_webhook_event(
        &self,
        event_id: &str,
        gateway: &str,
        event_type: &str,
    ) -> Result<bool, AppError>;
}
