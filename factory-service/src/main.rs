//! Factory service entry point.

use factory_service::config::FactoryConfig;
use factory_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = FactoryConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting factory-service"
    );

    // Log configuration (mask sensitive values)
    tracing::info!(
        service_name = %config.service_name,
        address = %config.common.address(),
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        razorpay_api = %config.razorpay.api_base_url,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    if let Err(e) = app.run_until_stopped().await {
        tracing::error!(error = %e, "Application error");
        return Err(e);
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
