//! Recurring plan purchases mirrored from the payment gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Authenticated,
    Active,
    Charged,
    Paused,
    Resumed,
    Halted,
    Cancelled,
    Completed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Authenticated => "authenticated",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Charged => "charged",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Resumed => "resumed",
            SubscriptionStatus::Halted => "halted",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Completed => "completed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "authenticated" => SubscriptionStatus::Authenticated,
            "active" => SubscriptionStatus::Active,
            "charged" => SubscriptionStatus::Charged,
            "paused" => SubscriptionStatus::Paused,
            "resumed" => SubscriptionStatus::Resumed,
            "halted" => SubscriptionStatus::Halted,
            "cancelled" => SubscriptionStatus::Cancelled,
            "completed" => SubscriptionStatus::Completed,
            _ => SubscriptionStatus::Pending,
        }
    }

    /// Map a `subscription.*` webhook event name to the status it implies.
    ///
    /// Razorpay sends `subscription.activated`; the shorter `subscription.active`
    /// is accepted as well.
    pub fn from_event(event: &str) -> Option<Self> {
        let status = match event.strip_prefix("subscription.")? {
            "pending" => SubscriptionStatus::Pending,
            "authenticated" => SubscriptionStatus::Authenticated,
            "activated" | "active" => SubscriptionStatus::Active,
            "charged" => SubscriptionStatus::Charged,
            "paused" => SubscriptionStatus::Paused,
            "resumed" => SubscriptionStatus::Resumed,
            "halted" => SubscriptionStatus::Halted,
            "cancelled" => SubscriptionStatus::Cancelled,
            "completed" => SubscriptionStatus::Completed,
            _ => return None,
        };
        Some(status)
    }

    /// Whether the subscriber is entitled to the plan in this status.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Resumed | SubscriptionStatus::Charged
        )
    }

    /// Statuses after which the checkout can no longer succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Halted
                | SubscriptionStatus::Cancelled
                | SubscriptionStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_plan_id: Uuid,
    /// Subscription id at the gateway.
    pub subscription_id: String,
    pub payment_gateway_name: String,
    pub status: String,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub charged_count: i32,
    pub total_charged_count: i32,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSubscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn set_status(&mut self, status: SubscriptionStatus) {
        self.status = status.as_str().to_string();
        self.is_active = status.is_active();
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserSubscription {
    pub user_id: Uuid,
    pub product_plan_id: Uuid,
    pub subscription_id: String,
    pub payment_gateway_name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub charged_count: i32,
    pub total_charged_count: i32,
}

/// Filter for subscription listings. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub user_id: Option<Uuid>,
    pub product_plan_id: Option<Uuid>,
    pub status: Option<SubscriptionStatus>,
    pub is_active: Option<bool>,
    pub min_charged_count: Option<i32>,
    pub max_charged_count: Option<i32>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub start: i64,
    pub limit: i64,
}
