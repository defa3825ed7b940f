use serde::Deserialize;
use std::collections::HashMap;
use validator::Validate;

use crate::models::{Currency, PlanSortField, PlanType, ProductPlanFilter, SortOrder};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductPlanRequest {
    #[validate(length(min = 1, max = 100, message = "Plan name must be 1-100 characters"))]
    pub plan_name: String,

    #[validate(length(max = 2000))]
    #[serde(default)]
    pub plan_description: String,

    #[validate(range(min = 0.01, message = "Plan price must be positive"))]
    pub plan_price: f64,

    pub plan_currency: Currency,

    #[validate(range(min = 0, max = 3650))]
    #[serde(default)]
    pub plan_duration_days: i32,

    pub plan_type: PlanType,

    #[validate(range(min = 0, message = "Tokens must not be negative"))]
    pub tokens: i64,

    #[validate(range(min = 1, max = 120))]
    pub billing_cycles: Option<i32>,

    pub is_active: Option<bool>,

    #[validate(length(max = 50))]
    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub payment_gateway_ids: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProductPlanRequest {
    #[validate(length(min = 1, max = 100, message = "Plan name must be 1-100 characters"))]
    pub plan_name: Option<String>,

    #[validate(length(max = 2000))]
    pub plan_description: Option<String>,

    #[validate(range(min = 0.01, message = "Plan price must be positive"))]
    pub plan_price: Option<f64>,

    pub plan_currency: Option<Currency>,

    #[validate(range(min = 0, max = 3650))]
    pub plan_duration_days: Option<i32>,

    pub plan_type: Option<PlanType>,

    #[validate(range(min = 0, message = "Tokens must not be negative"))]
    pub tokens: Option<i64>,

    #[validate(range(min = 1, max = 120))]
    pub billing_cycles: Option<i32>,

    pub is_active: Option<bool>,

    #[validate(length(max = 50))]
    pub features: Option<Vec<String>>,

    pub payment_gateway_ids: Option<HashMap<String, String>>,
}

/// Query string for `GET /products`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProductPlanQuery {
    pub plan_type: Option<PlanType>,
    pub is_active: Option<bool>,
    pub plan_currency: Option<Currency>,
    pub sort_by: Option<PlanSortField>,
    pub sort_order: Option<SortOrder>,

    #[validate(range(min = 0, message = "start must not be negative"))]
    pub start: Option<i64>,

    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

impl From<ProductPlanQuery> for ProductPlanFilter {
    fn from(query: ProductPlanQuery) -> Self {
        ProductPlanFilter {
            plan_type: query.plan_type,
            is_active: query.is_active,
            plan_currency: query.plan_currency,
            sort_by: query.sort_by.unwrap_or_default(),
            sort_order: query.sort_order.unwrap_or_default(),
            start: query.start.unwrap_or(0),
            limit: query.limit.unwrap_or(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> CreateProductPlanRequest {
        serde_json::from_value(serde_json::json!({
            "plan_name": "Starter",
            "plan_price": 499.0,
            "plan_currency": "INR",
            "plan_type": "one_time",
            "tokens": 100
        }))
        .unwrap()
    }

    #[test]
    fn test_create_request_defaults() {
        let req = valid_request();
        assert!(req.validate().is_ok());
        assert!(req.features.is_empty());
        assert!(req.payment_gateway_ids.is_empty());
        assert_eq!(req.plan_duration_days, 0);
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let mut req = valid_request();
        req.plan_price = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_query_limit_bounds() {
        let query = ProductPlanQuery {
            limit: Some(101),
            ..Default::default()
        };
        assert!(query.validate().is_err());

        let query = ProductPlanQuery {
            limit: Some(100),
            start: Some(0),
            ..Default::default()
        };
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_query_into_filter() {
        let filter: ProductPlanFilter = ProductPlanQuery::default().into();
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.start, 0);
        assert_eq!(filter.sort_by, PlanSortField::CreatedAt);
        assert_eq!(filter.sort_order, SortOrder::Desc);
    }
}
