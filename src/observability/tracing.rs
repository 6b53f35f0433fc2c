use crate::config::ObservabilityConfig;
use crate::errors::{LimiterError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging. RUST_LOG takes precedence over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| LimiterError::Configuration(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_format.as_str() {
        "json" => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
        _ => registry.with(fmt::layer().pretty()).try_init(),
    };

    installed.map_err(|e| LimiterError::Configuration(e.to_string()))?;

    tracing::info!(
        level = %config.log_level,
        format = %config.log_format,
        "Tracing initialized"
    );

    Ok(())
}
