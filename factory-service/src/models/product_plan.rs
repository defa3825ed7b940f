//! Product plans: the purchasable offerings and their token grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "INR")]
    Inr,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Inr => "INR",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "INR" => Some(Currency::Inr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Subscription,
    OneTime,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Subscription => "subscription",
            PlanType::OneTime => "one_time",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "subscription" => Some(PlanType::Subscription),
            "one_time" => Some(PlanType::OneTime),
            _ => None,
        }
    }
}

/// Columns plans can be listed by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanSortField {
    #[serde(rename = "planName")]
    PlanName,
    #[serde(rename = "planPrice")]
    PlanPrice,
    #[default]
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "updatedAt")]
    UpdatedAt,
}

impl PlanSortField {
    pub fn column(&self) -> &'static str {
        match self {
            PlanSortField::PlanName => "plan_name",
            PlanSortField::PlanPrice => "plan_price",
            PlanSortField::CreatedAt => "created_at",
            PlanSortField::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductPlan {
    pub id: Uuid,
    pub plan_name: String,
    pub plan_description: String,
    /// Price in major currency units, e.g. rupees.
    pub plan_price: f64,
    pub plan_currency: String,
    pub plan_duration_days: i32,
    pub plan_type: String,
    /// Tokens granted per purchased unit or per subscription charge.
    pub tokens: i64,
    pub billing_cycles: i32,
    pub is_active: bool,
    pub features: Json<Vec<String>>,
    /// Gateway name to the plan id registered at that gateway.
    pub payment_gateway_ids: Json<HashMap<String, String>>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductPlan {
    pub fn plan_type(&self) -> Option<PlanType> {
        PlanType::from_string(&self.plan_type)
    }

    pub fn currency(&self) -> Option<Currency> {
        Currency::from_string(&self.plan_currency)
    }

    /// Unit price in the currency's smallest unit (paise, cents).
    pub fn price_in_minor_units(&self) -> i64 {
        to_minor_units(self.plan_price)
    }

    pub fn gateway_plan_id(&self, gateway: &str) -> Option<&str> {
        self.payment_gateway_ids
            .0
            .get(gateway)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

pub fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

/// Listing filter for `GET /products`.
#[derive(Debug, Clone, Default)]
pub struct ProductPlanFilter {
    pub plan_type: Option<PlanType>,
    pub is_active: Option<bool>,
    pub plan_currency: Option<Currency>,
    pub sort_by: PlanSortField,
    pub sort_order: SortOrder,
    pub start: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units_rounding() {
        assert_eq!(to_minor_units(499.0), 49900);
        assert_eq!(to_minor_units(19.99), 1999);
        assert_eq!(to_minor_units(0.1 + 0.2), 30);
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!(Currency::from_string("inr"), Some(Currency::Inr));
        assert_eq!(Currency::from_string("USD"), Some(Currency::Usd));
        assert_eq!(Currency::from_string("GBP"), None);
        assert_eq!(
            serde_json::to_string(&Currency::Eur).unwrap(),
            "\"EUR\""
        );
    }

    #[test]
    fn test_sort_field_wire_names() {
        let field: PlanSortField = serde_json::from_str("\"planPrice\"").unwrap();
        assert_eq!(field.column(), "plan_price");
        assert_eq!(PlanSortField::default().column(), "created_at");
    }
}
