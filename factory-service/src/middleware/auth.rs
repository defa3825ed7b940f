use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use service_core::error::AppError;

use crate::{models::User, AppState};

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<User, AppError> {
    let token = bearer_token(parts).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let claims = state
        .jwt
        .validate_access_token(token)
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token")))?;

    let user_id = claims
        .user_id()
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token")))?;

    // Load the row rather than trusting claims, so balances and account
    // flags are current.
    let mut user = state
        .db
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("User no longer exists")))?;

    if let Some(reason) = user.access_denied_reason() {
        tracing::warn!(user_id = %user.id, reason, "Rejected request from disabled account");
        return Err(AppError::Unauthorized(anyhow::anyhow!(reason)));
    }

    // Coming back within the grace period cancels a pending deletion.
    if user.marked_for_deletion {
        state.db.clear_deletion_mark(user.id).await?;
        user.marked_for_deletion = false;
        user.delete_account_after = None;
        tracing::info!(user_id = %user.id, "Account deletion cancelled");
    }

    Ok(user)
}

/// Extractor for the user behind a valid bearer token.
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(AuthUser(user.clone()));
        }

        let user = authenticate(parts, state).await?;
        parts.extensions.insert(user.clone());

        Ok(AuthUser(user))
    }
}

/// Like [`AuthUser`], but only for administrators.
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator access required"
            )));
        }

        Ok(AdminUser(user))
    }
}
