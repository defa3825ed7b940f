//! Razorpay payment provider client.
//!
//! Wraps the Orders and Subscriptions REST APIs and defines the webhook
//! envelope Razorpay posts back to us.

use crate::config::RazorpayConfig;
use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Order status Razorpay reports once a payment has been captured against it.
pub const ORDER_STATUS_PAID: &str = "paid";

#[derive(Debug, Error)]
pub enum RazorpayApiError {
    #[error("Razorpay credentials not configured")]
    NotConfigured,

    #[error("Razorpay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Razorpay error ({status}): {code} - {description}")]
    Api {
        status: u16,
        code: String,
        description: String,
    },

    #[error("Unexpected Razorpay response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RazorpayApiError {
    /// Whether repeating the call later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RazorpayApiError::Transport(_) => true,
            RazorpayApiError::Api { status, .. } => *status == 429 || *status >= 500,
            RazorpayApiError::NotConfigured | RazorpayApiError::Decode(_) => false,
        }
    }
}

/// Request to create a Razorpay order.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in smallest currency unit (paise for INR).
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    pub partial_payment: bool,
    pub notes: serde_json::Value,
}

/// Order entity as returned by the API and embedded in webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub amount_paid: u64,
    #[serde(default)]
    pub amount_due: u64,
    #[serde(default)]
    pub currency: String,
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub attempts: u32,
    /// Razorpay sends `[]` instead of `{}` when there are no notes.
    #[serde(default)]
    pub notes: serde_json::Value,
    #[serde(default)]
    pub created_at: i64,
}

/// Request to create a Razorpay subscription.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    pub total_count: u32,
    pub quantity: u32,
    pub customer_notify: u8,
    pub notes: serde_json::Value,
}

/// Subscription entity as returned by the API and embedded in webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpaySubscription {
    pub id: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub plan_id: String,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub status: String,
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub notes: serde_json::Value,
    pub charge_at: Option<i64>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    #[serde(default)]
    pub auth_attempts: u32,
    #[serde(default)]
    pub total_count: i32,
    #[serde(default)]
    pub paid_count: i32,
    #[serde(default)]
    pub remaining_count: Option<serde_json::Value>,
    pub short_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// Payment entity embedded in webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub status: String,
    pub order_id: Option<String>,
    pub invoice_id: Option<String>,
    pub method: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    #[serde(default)]
    pub notes: serde_json::Value,
    #[serde(default)]
    pub created_at: i64,
}

/// Razorpay API error response.
#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

/// Webhook envelope posted by Razorpay.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub account_id: String,
    pub event: String,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub payload: WebhookPayload,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<EntityWrapper<PaymentEntity>>,
    pub order: Option<EntityWrapper<RazorpayOrder>>,
    pub subscription: Option<EntityWrapper<RazorpaySubscription>>,
}

/// Razorpay nests every payload entity under an `entity` key.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityWrapper<T> {
    pub entity: T,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn payment(&self) -> Option<&PaymentEntity> {
        self.payload.payment.as_ref().map(|p| &p.entity)
    }

    pub fn order(&self) -> Option<&RazorpayOrder> {
        self.payload.order.as_ref().map(|o| &o.entity)
    }

    pub fn subscription(&self) -> Option<&RazorpaySubscription> {
        self.payload.subscription.as_ref().map(|s| &s.entity)
    }

    /// Order id from the order entity, falling back to the payment's order.
    pub fn order_id(&self) -> Option<&str> {
        self.order()
            .map(|o| o.id.as_str())
            .or_else(|| self.payment().and_then(|p| p.order_id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Calls the gateway makes against Razorpay.
#[async_trait]
pub trait RazorpayApi: Send + Sync {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<RazorpayOrder, RazorpayApiError>;

    async fn fetch_order(&self, order_id: &str) -> Result<RazorpayOrder, RazorpayApiError>;

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RazorpaySubscription, RazorpayApiError>;

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<RazorpaySubscription, RazorpayApiError>;
}

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    /// Check if Razorpay is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, RazorpayApiError> {
        if !self.is_configured() {
            return Err(RazorpayApiError::NotConfigured);
        }

        let response = request
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .inspect_err(|_| {
                counter!("razorpay_api_requests_total", "operation" => operation, "status" => "error")
                    .increment(1);
            })?;

        let status = response.status();
        let body = response.text().await?;

        counter!(
            "razorpay_api_requests_total",
            "operation" => operation,
            "status" => status.as_u16().to_string()
        )
        .increment(1);

        tracing::debug!(operation, status = %status, "Razorpay response received");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let (code, description) = match serde_json::from_str::<RazorpayErrorBody>(&body) {
            Ok(err) => (err.error.code, err.error.description),
            Err(_) => ("UNKNOWN".to_string(), body),
        };

        tracing::error!(
            operation,
            status = status.as_u16(),
            code = %code,
            description = %description,
            "Razorpay request failed"
        );

        Err(RazorpayApiError::Api {
            status: status.as_u16(),
            code,
            description,
        })
    }
}

#[async_trait]
impl RazorpayApi for RazorpayClient {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<RazorpayOrder, RazorpayApiError> {
        let order: RazorpayOrder = self
            .send(self.client.post(self.url("orders")).json(request), "create_order")
            .await?;

        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            "Razorpay order created"
        );

        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<RazorpayOrder, RazorpayApiError> {
        self.send(
            self.client.get(self.url(&format!("orders/{}", order_id))),
            "fetch_order",
        )
        .await
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RazorpaySubscription, RazorpayApiError> {
        let subscription: RazorpaySubscription = self
            .send(
                self.client.post(self.url("subscriptions")).json(request),
                "create_subscription",
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan_id = %subscription.plan_id,
            "Razorpay subscription created"
        );

        Ok(subscription)
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<RazorpaySubscription, RazorpayApiError> {
        self.send(
            self.client
                .get(self.url(&format!("subscriptions/{}", subscription_id))),
            "fetch_subscription",
        )
        .await
    }
}
