use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use tracing::{info, warn};

use crate::{
    dtos::{
        subscription::SubscriptionQuery,
        user::{ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest},
        MessageResponse, PageQuery,
    },
    middleware::AuthUser,
    models::{SubscriptionFilter, UserRole},
    utils::{hash_password, verify_password, Password, ValidatedJson, ValidatedQuery},
    AppState,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let password_hash = hash_password(&Password::new(req.password))?;

    let user = state
        .db
        .create_user(req.name.trim(), req.email.trim(), &password_hash, UserRole::Client)
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut user = state
        .db
        .get_user_by_email(req.email.trim())
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!(INVALID_CREDENTIALS)))?;

    if let Some(reason) = user.access_denied_reason() {
        return Err(AppError::Forbidden(anyhow::anyhow!(reason)));
    }

    if !verify_password(&Password::new(req.password), &user.password_hash)? {
        let updated = state.db.record_failed_login(user.id).await?;
        warn!(
            user_id = %user.id,
            password_tries = updated.password_tries,
            "Failed login attempt"
        );

        if updated.account_blocked {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Account is blocked after too many failed attempts"
            )));
        }
        return Err(AppError::Unauthorized(anyhow::anyhow!(INVALID_CREDENTIALS)));
    }

    state.db.reset_password_tries(user.id).await?;
    user.password_tries = 0;

    let access_token = state.jwt.generate_access_token(&user)?;
    info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expiry_seconds(),
        user,
    }))
}

pub async fn get_me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !verify_password(&Password::new(req.current_password), &user.password_hash)? {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Current password is incorrect"
        )));
    }

    let password_hash = hash_password(&Password::new(req.new_password))?;
    state.db.update_password(user.id, &password_hash).await?;

    info!(user_id = %user.id, "Password changed");
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

/// Schedule the account for deletion. Any authenticated request before the
/// deadline cancels it.
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state.db.mark_for_deletion(user.id).await?;

    info!(
        user_id = %user.id,
        delete_after = ?user.delete_account_after,
        "Account marked for deletion"
    );

    Ok(Json(serde_json::json!({
        "message": "Account scheduled for deletion",
        "delete_account_after": user.delete_account_after,
    })))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedQuery(page): ValidatedQuery<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let transactions = state
        .db
        .list_user_transactions(user.id, page.start(), page.limit())
        .await?;

    Ok(Json(transactions))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedQuery(query): ValidatedQuery<SubscriptionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = SubscriptionFilter {
        user_id: Some(user.id),
        ..query.into()
    };

    let subscriptions = state.db.list_subscriptions(&filter).await?;
    Ok(Json(subscriptions))
}
