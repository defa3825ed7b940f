use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dtos::payment::{BuyQuery, InitiatePaymentResponse, WebhookResponse},
    middleware::AuthUser,
    services::{GatewayError, WebhookOutcome},
    utils::ValidatedQuery,
    AppState,
};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// `GET /products/:id/buy/:gateway?count=N`
pub async fn buy(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((plan_id, gateway_name)): Path<(Uuid, String)>,
    ValidatedQuery(query): ValidatedQuery<BuyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let gateway = state.gateways.get(&gateway_name)?;

    let plan = state
        .db
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product plan {} not found", plan_id)))?;

    let transaction = gateway
        .initiate_payment(&plan, &user, query.count())
        .await
        .map_err(|e| {
            error!(error = %e, plan_id = %plan.id, user_id = %user.id, "Payment initiation failed");
            AppError::from(e)
        })?;

    info!(
        user_id = %user.id,
        transaction_id = %transaction.id,
        gateway = %gateway.kind(),
        "Payment initiated"
    );

    Ok(Json(InitiatePaymentResponse {
        redirect_url: transaction.gateway_redirect_url.clone(),
        transaction,
        gateway_key_id: state.razorpay_key_id.clone(),
    }))
}

/// `POST /webhooks/:gateway`
///
/// The status code tells the gateway whether to redeliver: 2xx for events
/// that were applied or can never be applied, 5xx for transient failures.
pub async fn webhook(
    State(state): State<AppState>,
    Path(gateway_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let gateway = match state.gateways.get(&gateway_name) {
        Ok(gateway) => gateway,
        Err(e) => {
            warn!(error = %e, "Webhook for unknown payment gateway");
            return (
                StatusCode::OK,
                Json(WebhookResponse::message("Payment gateway not found")),
            )
                .into_response();
        }
    };

    let signature = header_str(&headers, SIGNATURE_HEADER).unwrap_or_default();
    if !gateway.verify_webhook(&body, signature) {
        warn!(gateway = %gateway.kind(), "Rejected webhook with invalid signature");
        return AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature"))
            .into_response();
    }

    let event_id = header_str(&headers, EVENT_ID_HEADER);

    match gateway.handle_webhook(event_id, &body).await {
        Ok(WebhookOutcome::AlreadyProcessed) => {
            info!(event_id, "Webhook event already processed");
            (
                StatusCode::OK,
                Json(WebhookResponse::message("Event already processed")),
            )
                .into_response()
        }
        Ok(outcome) => {
            let label = outcome.as_str();
            let message = match &outcome {
                WebhookOutcome::Ignored(reason) => reason.clone(),
                _ => "Successful processing transaction".to_string(),
            };
            info!(event_id, outcome = label, "Webhook processed");

            (
                StatusCode::OK,
                Json(WebhookResponse {
                    message,
                    outcome: Some(label),
                    transaction: outcome.into_transaction(),
                }),
            )
                .into_response()
        }
        Err(GatewayError::InvalidPayload(e)) => {
            warn!(error = %e, "Unparseable webhook body");
            AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)).into_response()
        }
        Err(e) if e.is_transient() => {
            error!(event_id, error = %e, "Webhook processing failed; gateway will retry");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::message(format!(
                    "Error processing transaction: {}",
                    e
                ))),
            )
                .into_response()
        }
        Err(e) => {
            warn!(event_id, error = %e, "Webhook rejected");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    message: e.to_string(),
                    outcome: Some("rejected"),
                    transaction: None,
                }),
            )
                .into_response()
        }
    }
}
