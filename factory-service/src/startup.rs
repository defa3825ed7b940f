//! Application startup and lifecycle management.

use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::create_ip_rate_limiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::FactoryConfig;
use crate::services::{
    init_metrics, Database, JwtService, PaymentGateways, RazorpayClient, RazorpayGateway,
};
use crate::utils::{hash_password, Password};
use crate::{build_router, AppState};

/// Factory service application.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connect to Postgres, run migrations, wire the payment gateways and
    /// bind the HTTP listener.
    pub async fn build(config: FactoryConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await?;

        bootstrap_admin(&db, &config).await?;

        let razorpay = RazorpayClient::new(config.razorpay.clone());
        if !razorpay.is_configured() {
            tracing::warn!("Razorpay credentials not set; payment initiation will fail");
        }
        let razorpay_key_id = razorpay.key_id().to_string();

        let gateways = PaymentGateways::new().register(Arc::new(RazorpayGateway::new(
            Arc::new(razorpay),
            Arc::new(db.clone()),
            config.razorpay.webhook_secret.clone(),
        )));

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );

        let state = AppState {
            jwt: JwtService::new(&config.jwt),
            db,
            gateways,
            razorpay_key_id,
            login_rate_limiter,
            config,
        };

        let address = state.config.common.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!(error = %e, addr = %address, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "Factory service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Serve requests until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "factory-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

/// Promote (or create) the configured administrator account.
async fn bootstrap_admin(db: &Database, config: &FactoryConfig) -> Result<(), AppError> {
    let (Some(email), Some(password)) = (
        config.bootstrap.admin_email.as_deref(),
        config.bootstrap.admin_password.as_ref(),
    ) else {
        return Ok(());
    };

    let password_hash = hash_password(&Password::new(password.expose_secret().clone()))
        .map_err(AppError::InternalError)?;
    db.ensure_admin(email, &password_hash).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
