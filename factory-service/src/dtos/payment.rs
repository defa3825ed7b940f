use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Transaction;

/// Query string for `GET /products/:id/buy/:gateway`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct BuyQuery {
    #[validate(range(min = 1, max = 1000, message = "count must be between 1 and 1000"))]
    pub count: Option<u32>,
}

impl BuyQuery {
    pub fn count(&self) -> u32 {
        self.count.unwrap_or(1)
    }
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub transaction: Transaction,
    /// Public key the checkout widget is opened with.
    pub gateway_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

impl WebhookResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            outcome: None,
            transaction: None,
        }
    }
}
