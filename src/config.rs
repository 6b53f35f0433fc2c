use crate::errors::{LimiterError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub limiter: LimiterConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Store calls slower than this count as connectivity failures
    pub command_timeout_ms: u64,
    /// Library name reported to the server with CLIENT SETINFO
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Namespace prepended to every rate key
    pub prefix: String,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let environment =
            env::var("WINDOW_LIMITER_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // e.g., WINDOW_LIMITER__LIMITER__PREFIX=api
            .add_source(
                config::Environment::with_prefix("WINDOW_LIMITER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LimiterError::Configuration(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| LimiterError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(LimiterError::Configuration("Invalid port number".to_string()));
        }

        if self.redis.url.is_empty() {
            return Err(LimiterError::Configuration(
                "Redis URL is required".to_string(),
            ));
        }

        if self.redis.command_timeout_ms == 0 {
            return Err(LimiterError::Configuration(
                "Redis command timeout must be positive".to_string(),
            ));
        }

        if self.limiter.prefix.is_empty() {
            return Err(LimiterError::Configuration(
                "Rate key prefix must not be empty".to_string(),
            ));
        }

        if let Some(breaker) = &self.limiter.circuit_breaker {
            breaker.validate()?;
        }

        Ok(())
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(LimiterError::Configuration(
                "Circuit breaker failure threshold must be at least 1".to_string(),
            ));
        }
        if self.recovery_seconds == 0 {
            return Err(LimiterError::Configuration(
                "Circuit breaker recovery must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = Config::load().expect("Failed to load config");
        assert!(config.validate().is_ok());

        // Test invalid port
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_breaker_is_valid() {
        let config = Config::load().expect("Failed to load config");
        let breaker = config
            .limiter
            .circuit_breaker
            .expect("default config enables the breaker");
        assert!(breaker.validate().is_ok());
    }

    #[test]
    fn test_breaker_rejects_zero_threshold() {
        let breaker = CircuitBreakerConfig {
            failure_threshold: 0,
            recovery_seconds: 30,
        };
        assert!(matches!(
            breaker.validate(),
            Err(LimiterError::Configuration(_))
        ));
    }
}
