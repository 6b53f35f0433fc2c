use crate::{config::RedisConfig, errors::Result};
use redis::{aio::ConnectionManager, Client};

/// Create a Redis client and connection manager
pub async fn create_client(config: &RedisConfig) -> Result<ConnectionManager> {
    tracing::info!("Creating Redis client");

    let client = Client::open(config.url.as_str())?;

    let mut manager = ConnectionManager::new(client).await?;

    identify_client(&mut manager, &config.client_name).await;

    tracing::info!("Redis client connected");

    Ok(manager)
}

/// Library name reported to the server, e.g. `redis-rs(window-limiter_v0.1.0)`
pub fn library_name(client_name: &str) -> String {
    format!("redis-rs({}_v{})", client_name, env!("CARGO_PKG_VERSION"))
}

/// Tag the connection so operators can see who is running the scripts.
/// Servers older than 7.2 reject CLIENT SETINFO; that is not an error.
async fn identify_client(manager: &mut ConnectionManager, client_name: &str) {
    let result: redis::RedisResult<()> = redis::cmd("CLIENT")
        .arg("SETINFO")
        .arg("LIB-NAME")
        .arg(library_name(client_name))
        .query_async(manager)
        .await;

    if let Err(e) = result {
        tracing::debug!(error = %e, "CLIENT SETINFO not supported, skipping");
    }
}
