//! Payment gateway adapter: turns purchases into gateway orders and
//! subscriptions, and folds gateway webhooks back into transaction,
//! subscription and token state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::utils::verify_hmac_sha256;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    CreateTransaction, CreateUserSubscription, PlanType, ProductPlan, SubscriptionStatus,
    Transaction, TransactionStatus, User, UserSubscription,
};
use crate::services::metrics::{record_payment_initiated, record_webhook_event};
use crate::services::razorpay::{
    CreateOrderRequest, CreateSubscriptionRequest, PaymentEntity, RazorpayApi, RazorpayApiError,
    WebhookEvent, ORDER_STATUS_PAID,
};
use crate::services::store::PaymentStore;

pub const RAZORPAY: &str = "razorpay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    Razorpay,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Razorpay => RAZORPAY,
        }
    }
}

impl FromStr for GatewayKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            RAZORPAY => Ok(GatewayKind::Razorpay),
            _ => Err(GatewayError::GatewayNotFound(s.to_string())),
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway not found: {0}")]
    GatewayNotFound(String),

    #[error("Invalid plan type: {0}")]
    InvalidPlanType(String),

    #[error("Product plan is not active")]
    PlanInactive,

    #[error("Product plan not found")]
    PlanNotFound,

    #[error("Invalid purchase count: {0}")]
    InvalidCount(u32),

    #[error("Product plan has no {0} plan id")]
    MissingGatewayPlan(&'static str),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Invalid order id")]
    InvalidOrderId,

    #[error("Invalid subscription id")]
    InvalidSubscriptionId,

    #[error("Subscription charge carries no payment")]
    MissingPayment,

    #[error("Order is not paid, status: {0}")]
    OrderNotPaid(String),

    #[error("Transaction not found for {0}")]
    TransactionNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Invalid subscription event: {0}")]
    InvalidSubscriptionEvent(String),

    #[error(transparent)]
    Provider(#[from] RazorpayApiError),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl GatewayError {
    /// Whether the gateway should deliver the webhook again.
    ///
    /// Everything else is a permanent problem with the event itself, and
    /// redelivering it would fail the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Provider(e) => e.is_retryable(),
            GatewayError::Store(e) => matches!(
                e,
                AppError::DatabaseError(_)
                    | AppError::ServiceUnavailable
                    | AppError::InternalError(_)
            ),
            _ => false,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Store(e) => e,
            GatewayError::Provider(e) => match e {
                RazorpayApiError::NotConfigured => AppError::ServiceUnavailable,
                other => AppError::BadGateway(other.to_string()),
            },
            GatewayError::GatewayNotFound(_)
            | GatewayError::PlanNotFound
            | GatewayError::TransactionNotFound(_)
            | GatewayError::SubscriptionNotFound(_) => AppError::NotFound(anyhow::anyhow!(err)),
            other => AppError::BadRequest(anyhow::anyhow!(other)),
        }
    }
}

/// What applying one webhook did.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// State changed; tokens were credited if the transaction grants any.
    Applied(Option<Transaction>),
    /// The change had already been applied by an earlier delivery.
    Duplicate(Option<Transaction>),
    /// The event id is in the processed-events ledger.
    AlreadyProcessed,
    /// Nothing to do for this event.
    Ignored(String),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied(_) => "applied",
            WebhookOutcome::Duplicate(_) => "duplicate",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            WebhookOutcome::Applied(t) | WebhookOutcome::Duplicate(t) => t.as_ref(),
            _ => None,
        }
    }

    pub fn into_transaction(self) -> Option<Transaction> {
        match self {
            WebhookOutcome::Applied(t) | WebhookOutcome::Duplicate(t) => t,
            _ => None,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Check the signature header the gateway sent with a webhook body.
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;

    /// Start a purchase of `count` units of `plan` for `user`.
    async fn initiate_payment(
        &self,
        plan: &ProductPlan,
        user: &User,
        count: u32,
    ) -> Result<Transaction, GatewayError>;

    async fn capture_order_paid(&self, event: &WebhookEvent)
        -> Result<WebhookOutcome, GatewayError>;

    async fn process_failed_payment(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, GatewayError>;

    async fn process_subscription_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, GatewayError>;

    /// Parse a verified webhook body and apply it at most once per event id.
    async fn handle_webhook(
        &self,
        event_id: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, GatewayError>;
}

pub struct RazorpayGateway {
    api: Arc<dyn RazorpayApi>,
    store: Arc<dyn PaymentStore>,
    webhook_secret: Secret<String>,
}

impl RazorpayGateway {
    pub fn new(
        api: Arc<dyn RazorpayApi>,
        store: Arc<dyn PaymentStore>,
        webhook_secret: Secret<String>,
    ) -> Self {
        Self {
            api,
            store,
            webhook_secret,
        }
    }

    async fn initiate_one_time(
        &self,
        plan: &ProductPlan,
        user: &User,
        count: u32,
    ) -> Result<Transaction, GatewayError> {
        let units = i64::from(count);
        let amount = plan
            .price_in_minor_units()
            .checked_mul(units)
            .ok_or(GatewayError::InvalidCount(count))?;
        let tokens = plan
            .tokens
            .checked_mul(units)
            .ok_or(GatewayError::InvalidCount(count))?;
        let order_amount = u64::try_from(amount).map_err(|_| GatewayError::InvalidCount(count))?;

        let transaction = self
            .store
            .create_transaction(&CreateTransaction {
                id: Uuid::new_v4(),
                user_id: user.id,
                product_plan_id: Some(plan.id),
                tokens,
                amount,
                currency: plan.plan_currency.clone(),
                status: TransactionStatus::Pending,
                payment_gateway_name: RAZORPAY.to_string(),
                gateway_transaction_id: None,
                gateway_redirect_url: None,
            })
            .await?;

        let order = match self
            .api
            .create_order(&CreateOrderRequest {
                amount: order_amount,
                currency: plan.plan_currency.clone(),
                receipt: transaction.receipt_id.clone(),
                partial_payment: false,
                notes: serde_json::json!({ "user_id": user.id.to_string() }),
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // The order never existed at the gateway; close the attempt.
                self.store.fail_transaction(transaction.id).await?;
                return Err(e.into());
            }
        };

        if order.id.is_empty() {
            self.store.fail_transaction(transaction.id).await?;
            return Err(GatewayError::InvalidOrderId);
        }

        let transaction = self
            .store
            .attach_gateway_reference(transaction.id, &order.id, None)
            .await?;

        info!(
            transaction_id = %transaction.id,
            order_id = %order.id,
            amount,
            tokens,
            "One-time payment initiated"
        );

        Ok(transaction)
    }

    async fn initiate_subscription(
        &self,
        plan: &ProductPlan,
        user: &User,
    ) -> Result<Transaction, GatewayError> {
        let plan_id = plan
            .gateway_plan_id(RAZORPAY)
            .ok_or(GatewayError::MissingGatewayPlan(RAZORPAY))?;

        let subscription = self
            .api
            .create_subscription(&CreateSubscriptionRequest {
                plan_id: plan_id.to_string(),
                total_count: u32::try_from(plan.billing_cycles.max(1)).unwrap_or(1),
                quantity: 1,
                customer_notify: 1,
                notes: serde_json::json!({ "user_id": user.id.to_string() }),
            })
            .await?;

        if subscription.id.is_empty() {
            return Err(GatewayError::InvalidSubscriptionId);
        }

        // Tokens arrive with each subscription.charged payment, not here.
        let transaction = self
            .store
            .create_transaction(&CreateTransaction {
                id: Uuid::new_v4(),
                user_id: user.id,
                product_plan_id: Some(plan.id),
                tokens: 0,
                amount: plan.price_in_minor_units(),
                currency: plan.plan_currency.clone(),
                status: TransactionStatus::Pending,
                payment_gateway_name: RAZORPAY.to_string(),
                gateway_transaction_id: Some(subscription.id.clone()),
                gateway_redirect_url: subscription.short_url.clone(),
            })
            .await?;

        self.store
            .create_subscription(&CreateUserSubscription {
                user_id: user.id,
                product_plan_id: plan.id,
                subscription_id: subscription.id.clone(),
                payment_gateway_name: RAZORPAY.to_string(),
                start_date: subscription.start_at.and_then(from_unix),
                end_date: subscription.end_at.and_then(from_unix),
                charged_count: subscription.paid_count,
                total_charged_count: subscription.total_count,
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            subscription_id = %subscription.id,
            "Subscription payment initiated"
        );

        Ok(transaction)
    }

    /// Close the transaction opened when the subscription was created.
    async fn settle_subscription_checkout(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), GatewayError> {
        let Some(checkout) = self
            .store
            .find_transaction_by_gateway_id(RAZORPAY, subscription_id)
            .await?
        else {
            return Ok(());
        };

        if status.is_active() {
            if self.store.complete_transaction(checkout.id).await?.is_some() {
                info!(transaction_id = %checkout.id, "Subscription checkout completed");
            }
        } else if status.is_terminal()
            && self.store.fail_transaction(checkout.id).await?.is_some()
        {
            info!(transaction_id = %checkout.id, "Subscription checkout failed");
        }

        Ok(())
    }

    async fn record_subscription_charge(
        &self,
        payment: &PaymentEntity,
        subscription: &UserSubscription,
    ) -> Result<WebhookOutcome, GatewayError> {
        let plan = self
            .store
            .find_plan(subscription.product_plan_id)
            .await?
            .ok_or(GatewayError::PlanNotFound)?;

        let recorded = self
            .store
            .record_completed_transaction(&CreateTransaction {
                id: Uuid::new_v4(),
                user_id: subscription.user_id,
                product_plan_id: Some(plan.id),
                tokens: plan.tokens,
                amount: i64::try_from(payment.amount).unwrap_or(i64::MAX),
                currency: plan.plan_currency.clone(),
                status: TransactionStatus::Completed,
                payment_gateway_name: RAZORPAY.to_string(),
                gateway_transaction_id: Some(payment.id.clone()),
                gateway_redirect_url: None,
            })
            .await?;

        match recorded {
            Some(transaction) => {
                info!(
                    transaction_id = %transaction.id,
                    payment_id = %payment.id,
                    tokens = transaction.tokens,
                    "Subscription charge recorded"
                );
                Ok(WebhookOutcome::Applied(Some(transaction)))
            }
            None => {
                let existing = self
                    .store
                    .find_transaction_by_gateway_id(RAZORPAY, &payment.id)
                    .await?;
                Ok(WebhookOutcome::Duplicate(existing))
            }
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<WebhookOutcome, GatewayError> {
        match event.event.as_str() {
            "order.paid" => self.capture_order_paid(event).await,
            "payment.failed" => self.process_failed_payment(event).await,
            name if SubscriptionStatus::from_event(name).is_some() => {
                self.process_subscription_event(event).await
            }
            name => Ok(WebhookOutcome::Ignored(format!("Unhandled event {}", name))),
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        let secret = self.webhook_secret.expose_secret();
        if secret.is_empty() || signature.trim().is_empty() {
            return false;
        }

        match verify_hmac_sha256(secret, body, signature) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "Webhook signature check failed");
                false
            }
        }
    }

    #[instrument(skip(self, plan, user), fields(plan_id = %plan.id, user_id = %user.id))]
    async fn initiate_payment(
        &self,
        plan: &ProductPlan,
        user: &User,
        count: u32,
    ) -> Result<Transaction, GatewayError> {
        if !plan.is_active {
            return Err(GatewayError::PlanInactive);
        }

        let plan_type = plan
            .plan_type()
            .ok_or_else(|| GatewayError::InvalidPlanType(plan.plan_type.clone()))?;

        let transaction = match plan_type {
            PlanType::OneTime => {
                if count == 0 {
                    return Err(GatewayError::InvalidCount(count));
                }
                self.initiate_one_time(plan, user, count).await?
            }
            PlanType::Subscription => self.initiate_subscription(plan, user).await?,
        };

        record_payment_initiated(plan_type.as_str());
        Ok(transaction)
    }

    #[instrument(skip(self, event))]
    async fn capture_order_paid(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, GatewayError> {
        let order_id = event.order_id().ok_or(GatewayError::InvalidOrderId)?;

        let order = self.api.fetch_order(order_id).await?;
        if order.status != ORDER_STATUS_PAID {
            return Err(GatewayError::OrderNotPaid(order.status));
        }

        let transaction = self
            .store
            .find_transaction_by_gateway_id(RAZORPAY, order_id)
            .await?
            .ok_or_else(|| GatewayError::TransactionNotFound(order_id.to_string()))?;

        if transaction.is_completed() {
            info!(order_id, "Order already captured; ignoring duplicate event");
            return Ok(WebhookOutcome::Duplicate(Some(transaction)));
        }

        match self.store.complete_transaction(transaction.id).await? {
            Some(completed) => {
                info!(
                    order_id,
                    transaction_id = %completed.id,
                    tokens = completed.tokens,
                    "Order captured"
                );
                Ok(WebhookOutcome::Applied(Some(completed)))
            }
            // A concurrent delivery completed it first.
            None => {
                let current = self
                    .store
                    .find_transaction_by_gateway_id(RAZORPAY, order_id)
                    .await?;
                Ok(WebhookOutcome::Duplicate(current))
            }
        }
    }

    #[instrument(skip(self, event))]
    async fn process_failed_payment(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, GatewayError> {
        let order_id = event.order_id().ok_or(GatewayError::InvalidOrderId)?;

        let order = self.api.fetch_order(order_id).await?;
        if order.status == ORDER_STATUS_PAID {
            return Ok(WebhookOutcome::Ignored(format!(
                "Order {} was paid by a later attempt",
                order_id
            )));
        }

        let transaction = self
            .store
            .find_transaction_by_gateway_id(RAZORPAY, order_id)
            .await?
            .ok_or_else(|| GatewayError::TransactionNotFound(order_id.to_string()))?;

        match transaction.status() {
            TransactionStatus::Completed => {
                return Ok(WebhookOutcome::Ignored(format!(
                    "Order {} already completed",
                    order_id
                )))
            }
            TransactionStatus::Failed => return Ok(WebhookOutcome::Duplicate(Some(transaction))),
            TransactionStatus::Pending => {}
        }

        match self.store.fail_transaction(transaction.id).await? {
            Some(failed) => {
                info!(order_id, transaction_id = %failed.id, "Payment failed");
                Ok(WebhookOutcome::Applied(Some(failed)))
            }
            None => {
                let current = self
                    .store
                    .find_transaction_by_gateway_id(RAZORPAY, order_id)
                    .await?;
                match current {
                    Some(t) if t.is_completed() => Ok(WebhookOutcome::Ignored(format!(
                        "Order {} already completed",
                        order_id
                    ))),
                    other => Ok(WebhookOutcome::Duplicate(other)),
                }
            }
        }
    }

    #[instrument(skip(self, event), fields(event = %event.event))]
    async fn process_subscription_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, GatewayError> {
        let subscription_id = event
            .subscription_id()
            .ok_or(GatewayError::InvalidSubscriptionId)?;
        let status = SubscriptionStatus::from_event(&event.event)
            .ok_or_else(|| GatewayError::InvalidSubscriptionEvent(event.event.clone()))?;

        // Existence check at the gateway; a forged id fails here.
        self.api.fetch_subscription(subscription_id).await?;

        let mut subscription = self
            .store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| GatewayError::SubscriptionNotFound(subscription_id.to_string()))?;

        // Deliveries are unordered; a finished subscription never comes back.
        let current = subscription.status();
        if current.is_terminal() && !status.is_terminal() {
            warn!(
                subscription_id,
                current = current.as_str(),
                incoming = status.as_str(),
                "Late subscription event after terminal status"
            );
            return Ok(WebhookOutcome::Ignored(format!(
                "Subscription {} is already {}",
                subscription_id,
                current.as_str()
            )));
        }

        let payment = if status == SubscriptionStatus::Charged {
            let payment = event.payment().ok_or(GatewayError::MissingPayment)?;
            if payment.id.is_empty() {
                return Err(GatewayError::MissingPayment);
            }
            Some(payment)
        } else {
            None
        };

        if let Some(entity) = event.subscription() {
            subscription.charged_count = entity.paid_count;
            subscription.total_charged_count = entity.total_count;
            if let Some(start) = entity.start_at.and_then(from_unix) {
                subscription.start_date = Some(start);
            }
            if let Some(end) = entity.end_at.and_then(from_unix) {
                subscription.end_date = Some(end);
            }
        }
        subscription.set_status(status);
        subscription.suspended = matches!(
            status,
            SubscriptionStatus::Paused | SubscriptionStatus::Halted
        );

        self.settle_subscription_checkout(subscription_id, status)
            .await?;

        let outcome = match payment {
            Some(payment) => self.record_subscription_charge(payment, &subscription).await?,
            None => WebhookOutcome::Applied(None),
        };

        self.store.update_subscription(&subscription).await?;

        info!(
            subscription_id,
            status = status.as_str(),
            outcome = outcome.as_str(),
            "Subscription event applied"
        );

        Ok(outcome)
    }

    async fn handle_webhook(
        &self,
        event_id: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, GatewayError> {
        let event = WebhookEvent::parse(body)?;

        if let Some(id) = event_id {
            if self.store.has_webhook_event(id).await? {
                record_webhook_event(&event.event, WebhookOutcome::AlreadyProcessed.as_str());
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
        }

        let result = self.dispatch(&event).await;

        match &result {
            Ok(outcome) => {
                if let Some(id) = event_id {
                    self.store
                        .record_webhook_event(id, RAZORPAY, &event.event)
                        .await?;
                }
                record_webhook_event(&event.event, outcome.as_str());
            }
            Err(e) if e.is_transient() => record_webhook_event(&event.event, "retry"),
            Err(_) => record_webhook_event(&event.event, "rejected"),
        }

        result
    }
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0)
}

/// Gateways reachable by name from the `:gateway` path segment.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        let kind: GatewayKind = name.parse()?;
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::GatewayNotFound(name.to_string()))
    }
}
