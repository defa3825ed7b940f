use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use tracing::info;
use uuid::Uuid;

use crate::{
    dtos::{
        product::{CreateProductPlanRequest, ProductPlanQuery, UpdateProductPlanRequest},
        MessageResponse,
    },
    middleware::AdminUser,
    models::ProductPlanFilter,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

fn plan_not_found(plan_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Product plan {} not found", plan_id))
}

pub async fn list_plans(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ProductPlanQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter: ProductPlanFilter = query.into();
    let plans = state.db.list_plans(&filter).await?;
    Ok(Json(plans))
}

pub async fn create_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ValidatedJson(req): ValidatedJson<CreateProductPlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = state.db.create_plan(&req, admin.id).await?;

    info!(plan_id = %plan.id, admin_id = %admin.id, "Product plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let plan = state
        .db
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| plan_not_found(plan_id))?;

    Ok(Json(plan))
}

pub async fn update_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateProductPlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = state
        .db
        .update_plan(plan_id, &req, admin.id)
        .await?
        .ok_or_else(|| plan_not_found(plan_id))?;

    info!(plan_id = %plan.id, admin_id = %admin.id, "Product plan updated");
    Ok(Json(plan))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_plan(plan_id).await? {
        return Err(plan_not_found(plan_id));
    }

    info!(plan_id = %plan_id, admin_id = %admin.id, "Product plan deleted");
    Ok(Json(MessageResponse::new("Product plan deleted successfully")))
}
