use std::{net::SocketAddr, sync::Arc, time::Duration};
use window_limiter::{
    api::create_router,
    config::Config,
    observability::init_tracing,
    rate_limit::LimiterRegistry,
    redis::{create_client, RedisStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability)?;

    tracing::info!("Starting window limiter service");
    tracing::info!("Configuration loaded: {:?}", config.server);

    // Create Redis connection
    let redis_manager = create_client(&config.redis).await?;
    tracing::info!("Redis connection established");

    let store = RedisStore::new(
        redis_manager,
        Duration::from_millis(config.redis.command_timeout_ms),
    );

    // Load window scripts
    let registry = Arc::new(LimiterRegistry::new(Arc::new(store), config.limiter.prefix.clone()));
    registry.init().await?;

    // Create router
    let app = create_router(
        registry,
        config.limiter.circuit_breaker,
        config.observability.metrics_enabled,
    )?;

    // Bind server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Window limiter service is ready to accept requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
