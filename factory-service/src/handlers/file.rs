use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{file::CreateFileRequest, MessageResponse, PageQuery},
    middleware::AuthUser,
    models::CreateFile,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

fn file_not_found(file_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("File {} not found", file_id))
}

/// Register metadata for an object the client already stored.
pub async fn create_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .db
        .create_file(&CreateFile {
            user_id: user.id,
            file_name: req.file_name,
            content_type: req.content_type,
            size_bytes: req.size_bytes,
            storage_key: req.storage_key,
        })
        .await?;

    tracing::info!(file_id = %file.id, user_id = %user.id, "File registered");
    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedQuery(page): ValidatedQuery<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let files = state
        .db
        .list_files(user.id, page.start(), page.limit())
        .await?;
    Ok(Json(files))
}

pub async fn get_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .db
        .get_file(user.id, file_id)
        .await?
        .ok_or_else(|| file_not_found(file_id))?;
    Ok(Json(file))
}

pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_file(user.id, file_id).await? {
        return Err(file_not_found(file_id));
    }
    Ok(Json(MessageResponse::new("File deleted successfully")))
}
