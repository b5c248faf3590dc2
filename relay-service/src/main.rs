use relay_service::config::RelayConfig;
use relay_service::services::metrics::init_metrics;
use relay_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("relay-service", "info", None);
            tracing::error!("Failed to load configuration: {}", e);
            return Err(std::io::Error::other(format!("Configuration error: {}", e)));
        }
    };

    init_tracing(
        "relay-service",
        &config.common.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        model = %config.upstream.model,
        timeout_secs = config.relay.timeout.as_secs(),
        request_types = config.templates.len(),
        "Configuration loaded"
    );

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    application.run_until_stopped().await
}
