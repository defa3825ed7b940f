use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }
}

/// A single payment attempt and the tokens it grants once completed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_plan_id: Option<Uuid>,
    pub tokens: i64,
    /// Amount in the currency's smallest unit.
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub payment_gateway_name: String,
    /// Order id, subscription id or payment id at the gateway.
    pub gateway_transaction_id: Option<String>,
    pub gateway_redirect_url: Option<String>,
    pub receipt_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_string(&self.status)
    }

    pub fn is_completed(&self) -> bool {
        self.status() == TransactionStatus::Completed
    }
}

#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_plan_id: Option<Uuid>,
    pub tokens: i64,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_gateway_name: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_redirect_url: Option<String>,
}

impl CreateTransaction {
    /// Receipt sent to the gateway; Razorpay caps receipts at 40 characters.
    pub fn receipt_id(&self) -> String {
        receipt_for(self.id)
    }
}

pub fn receipt_for(transaction_id: Uuid) -> String {
    format!("rcpt_{}", transaction_id.simple())
}
