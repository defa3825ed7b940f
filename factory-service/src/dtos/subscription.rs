use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{SubscriptionFilter, SubscriptionStatus};

/// Query string for subscription listings.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubscriptionQuery {
    pub user_id: Option<Uuid>,
    pub product_plan_id: Option<Uuid>,
    pub status: Option<SubscriptionStatus>,
    pub is_active: Option<bool>,

    #[validate(range(min = 0))]
    pub min_charged_count: Option<i32>,

    #[validate(range(min = 0))]
    pub max_charged_count: Option<i32>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,

    #[validate(range(min = 0, message = "start must not be negative"))]
    pub start: Option<i64>,

    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

impl From<SubscriptionQuery> for SubscriptionFilter {
    fn from(query: SubscriptionQuery) -> Self {
        SubscriptionFilter {
            user_id: query.user_id,
            product_plan_id: query.product_plan_id,
            status: query.status,
            is_active: query.is_active,
            min_charged_count: query.min_charged_count,
            max_charged_count: query.max_charged_count,
            created_after: query.created_after,
            created_before: query.created_before,
            start: query.start.unwrap_or(0),
            limit: query.limit.unwrap_or(20),
        }
    }
}
