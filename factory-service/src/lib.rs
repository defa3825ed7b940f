pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use service_core::middleware::{
    ip_rate_limit_middleware, metrics_middleware, request_id_middleware,
    security_headers_middleware, IpRateLimiter,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::FactoryConfig;
use crate::handlers::payment::{EVENT_ID_HEADER, SIGNATURE_HEADER};
use crate::services::{Database, JwtService, PaymentGateways};

#[derive(Clone)]
pub struct AppState {
    pub config: FactoryConfig,
    pub db: Database,
    pub jwt: JwtService,
    pub gateways: PaymentGateways,
    /// Public Razorpay key handed to checkout clients.
    pub razorpay_key_id: String,
    pub login_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    // Login gets its own per-IP limiter
    let login_route = Router::new()
        .route("/user/login", post(handlers::user::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let user_routes = Router::new()
        .route("/user/create", post(handlers::user::register))
        .route(
            "/user/me",
            get(handlers::user::get_me).delete(handlers::user::delete_me),
        )
        .route("/user/password", patch(handlers::user::change_password))
        .route("/user/transactions", get(handlers::user::list_transactions))
        .route("/user/subscriptions", get(handlers::user::list_subscriptions))
        .route("/user/files", get(handlers::file::list_files));

    let product_routes = Router::new()
        .route("/products", get(handlers::product::list_plans))
        .route("/products/create", post(handlers::product::create_plan))
        .route(
            "/products/:id",
            get(handlers::product::get_plan)
                .put(handlers::product::update_plan)
                .delete(handlers::product::delete_plan),
        )
        .route("/products/:id/buy/:gateway", get(handlers::payment::buy));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .merge(login_route)
        .merge(user_routes)
        .merge(product_routes)
        .route("/webhooks/:gateway", post(handlers::payment::webhook))
        .route(
            "/subscriptions",
            get(handlers::subscription::list_subscriptions),
        )
        .route("/files", post(handlers::file::create_file))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .with_state(state.clone());

    app.layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

fn cors_layer(config: &FactoryConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderName::from_static(EVENT_ID_HEADER),
        ])
}
