//! In-process [`PaymentStore`] used to exercise the gateway without Postgres.
//!
//! Every operation takes one lock over the whole state, which gives the same
//! all-or-nothing behaviour as the database transactions.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    CreateTransaction, CreateUserSubscription, ProductPlan, SubscriptionStatus, Transaction,
    TransactionStatus, UserSubscription,
};
use crate::services::store::PaymentStore;

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, ProductPlan>,
    balances: HashMap<Uuid, i64>,
    transactions: HashMap<Uuid, Transaction>,
    subscriptions: HashMap<String, UserSubscription>,
    webhook_events: HashSet<String>,
}

impl State {
    fn credit(&mut self, user_id: Uuid, tokens: i64) -> Result<(), AppError> {
        let balance = self.balances.get_mut(&user_id).ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Cannot credit tokens: user {} not found",
                user_id
            ))
        })?;
        *balance += tokens;
        Ok(())
    }

    fn gateway_id_taken(&self, gateway: &str, gateway_transaction_id: &str) -> bool {
        self.transactions.values().any(|t| {
            t.payment_gateway_name == gateway
                && t.gateway_transaction_id.as_deref() == Some(gateway_transaction_id)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: Uuid) {
        self.state.lock().await.balances.insert(user_id, 0);
    }

    pub async fn add_plan(&self, plan: ProductPlan) {
        self.state.lock().await.plans.insert(plan.id, plan);
    }

    pub async fn tokens(&self, user_id: Uuid) -> Option<i64> {
        self.state.lock().await.balances.get(&user_id).copied()
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> Option<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .get(&transaction_id)
            .cloned()
    }

    pub async fn transactions_for(&self, user_id: Uuid) -> Vec<Transaction> {
        let state = self.state.lock().await;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| t.created_at);
        transactions
    }

    pub async fn webhook_event_count(&self) -> usize {
        self.state.lock().await.webhook_events.len()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<ProductPlan>, AppError> {
        Ok(self.state.lock().await.plans.get(&plan_id).cloned())
    }

    async fn create_transaction(&self, input: &CreateTransaction) -> Result<Transaction, AppError> {
        let mut state = self.state.lock().await;

        if let Some(ref gateway_id) = input.gateway_transaction_id {
            if state.gateway_id_taken(&input.payment_gateway_name, gateway_id) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Transaction for {} already exists",
                    gateway_id
                )));
            }
        }

        let transaction = new_transaction(input, input.status);
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn attach_gateway_reference(
        &self,
        transaction_id: Uuid,
        gateway_transaction_id: &str,
        redirect_url: Option<&str>,
    ) -> Result<Transaction, AppError> {
        let mut state = self.state.lock().await;
        let transaction = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

        transaction.gateway_transaction_id = Some(gateway_transaction_id.to_string());
        if let Some(url) = redirect_url {
            transaction.gateway_redirect_url = Some(url.to_string());
        }
        transaction.updated_at = Utc::now();

        Ok(transaction.clone())
    }

    async fn find_transaction_by_gateway_id(
        &self,
        gateway: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|t| {
                t.payment_gateway_name == gateway
                    && t.gateway_transaction_id.as_deref() == Some(gateway_transaction_id)
            })
            .cloned())
    }

    async fn complete_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let mut state = self.state.lock().await;

        let (user_id, tokens) = match state.transactions.get(&transaction_id) {
            Some(t) if !t.is_completed() => (t.user_id, t.tokens),
            _ => return Ok(None),
        };

        state.credit(user_id, tokens)?;

        let transaction = match state.transactions.get_mut(&transaction_id) {
            Some(t) => t,
            None => return Ok(None),
        };
        transaction.status = TransactionStatus::Completed.as_str().to_string();
        transaction.gateway_redirect_url = None;
        transaction.updated_at = Utc::now();

        Ok(Some(transaction.clone()))
    }

    async fn fail_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>, AppError> {
        let mut state = self.state.lock().await;

        match state.transactions.get_mut(&transaction_id) {
            Some(t) if t.status() == TransactionStatus::Pending => {
                t.status = TransactionStatus::Failed.as_str().to_string();
                t.gateway_redirect_url = None;
                t.updated_at = Utc::now();
                Ok(Some(t.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_completed_transaction(
        &self,
        input: &CreateTransaction,
    ) -> Result<Option<Transaction>, AppError> {
        let mut state = self.state.lock().await;

        if let Some(ref gateway_id) = input.gateway_transaction_id {
            if state.gateway_id_taken(&input.payment_gateway_name, gateway_id) {
                return Ok(None);
            }
        }

        state.credit(input.user_id, input.tokens)?;

        let mut transaction = new_transaction(input, TransactionStatus::Completed);
        transaction.gateway_redirect_url = None;
        state.transactions.insert(transaction.id, transaction.clone());

        Ok(Some(transaction))
    }

    async fn create_subscription(
        &self,
        input: &CreateUserSubscription,
    ) -> Result<UserSubscription, AppError> {
        let mut state = self.state.lock().await;

        if state.subscriptions.contains_key(&input.subscription_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription {} already exists",
                input.subscription_id
            )));
        }

        let now = Utc::now();
        let subscription = UserSubscription {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            product_plan_id: input.product_plan_id,
            subscription_id: input.subscription_id.clone(),
            payment_gateway_name: input.payment_gateway_name.clone(),
            status: SubscriptionStatus::Pending.as_str().to_string(),
            is_active: false,
            start_date: input.start_date,
            end_date: input.end_date,
            charged_count: input.charged_count,
            total_charged_count: input.total_charged_count,
            suspended: false,
            created_at: now,
            updated_at: now,
        };

        state
            .subscriptions
            .insert(subscription.subscription_id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .get(subscription_id)
            .cloned())
    }

    async fn update_subscription(
        &self,
        subscription: &UserSubscription,
    ) -> Result<UserSubscription, AppError> {
        let mut state = self.state.lock().await;

        let stored = state
            .subscriptions
            .get_mut(&subscription.subscription_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        *stored = subscription.clone();
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }

    async fn has_webhook_event(&self, event_id: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().await.webhook_events.contains(event_id))
    }

    async fn record_webhook_event(
        &self,
        event_id: &str,
        _gateway: &str,
        _event_type: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .webhook_events
            .insert(event_id.to_string()))
    }
}

fn new_transaction(input: &CreateTransaction, status: TransactionStatus) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: input.id,
        user_id: input.user_id,
        product_plan_id: input.product_plan_id,
        tokens: input.tokens,
        amount: input.amount,
        currency: input.currency.clone(),
        status: status.as_str().to_string(),
        payment_gateway_name: input.payment_gateway_name.clone(),
        gateway_transaction_id: input.gateway_transaction_id.clone(),
        gateway_redirect_url: input.gateway_redirect_url.clone(),
        receipt_id: input.receipt_id(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(user_id: Uuid, gateway_id: &str, tokens: i64) -> CreateTransaction {
        CreateTransaction {
            id: Uuid::new_v4(),
            user_id,
            product_plan_id: None,
            tokens,
            amount: 49900,
            currency: "INR".to_string(),
            status: TransactionStatus::Pending,
            payment_gateway_name: "razorpay".to_string(),
            gateway_transaction_id: Some(gateway_id.to_string()),
            gateway_redirect_url: None,
        }
    }

    #[tokio::test]
    async fn test_complete_credits_once() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.add_user(user_id).await;

        let txn = store
            .create_transaction(&pending(user_id, "order_1", 100))
            .await
            .unwrap();

        assert!(store.complete_transaction(txn.id).await.unwrap().is_some());
        assert!(store.complete_transaction(txn.id).await.unwrap().is_none());
        assert_eq!(store.tokens(user_id).await, Some(100));
    }

    #[tokio::test]
    async fn test_fail_only_from_pending() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.add_user(user_id).await;

        let txn = store
            .create_transaction(&pending(user_id, "order_2", 10))
            .await
            .unwrap();

        assert!(store.fail_transaction(txn.id).await.unwrap().is_some());
        assert!(store.fail_transaction(txn.id).await.unwrap().is_none());

        // A late success still wins over an earlier failure.
        assert!(store.complete_transaction(txn.id).await.unwrap().is_some());
        assert!(store.fail_transaction(txn.id).await.unwrap().is_none());
        assert_eq!(store.tokens(user_id).await, Some(10));
    }

    #[tokio::test]
    async fn test_record_completed_is_keyed_by_gateway_id() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.add_user(user_id).await;

        let first = pending(user_id, "pay_1", 50);
        let mut second = pending(user_id, "pay_1", 50);
        second.id = Uuid::new_v4();

        assert!(store.record_completed_transaction(&first).await.unwrap().is_some());
        assert!(store.record_completed_transaction(&second).await.unwrap().is_none());
        assert_eq!(store.tokens(user_id).await, Some(50));
    }

    #[tokio::test]
    async fn test_webhook_event_recorded_once() {
        let store = MemoryStore::new();
        assert!(!store.has_webhook_event("evt_1").await.unwrap());
        assert!(store.record_webhook_event("evt_1", "razorpay", "order.paid").await.unwrap());
        assert!(!store.record_webhook_event("evt_1", "razorpay", "order.paid").await.unwrap());
        assert!(store.has_webhook_event("evt_1").await.unwrap());
    }
}
