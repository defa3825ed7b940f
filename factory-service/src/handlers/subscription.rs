use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::subscription::SubscriptionQuery, middleware::AdminUser, models::SubscriptionFilter,
    utils::ValidatedQuery, AppState,
};

/// Subscription search across all users.
pub async fn list_subscriptions(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    ValidatedQuery(query): ValidatedQuery<SubscriptionQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let (Some(min), Some(max)) = (query.min_charged_count, query.max_charged_count) {
        if min > max {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "min_charged_count must not exceed max_charged_count"
            )));
        }
    }

    let filter: SubscriptionFilter = query.into();
    let subscriptions = state.db.list_subscriptions(&filter).await?;
    Ok(Json(subscriptions))
}
