use crate::rate_limit::LimiterRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub store: ComponentStatus,
    pub scripts: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: Option<String>,
}

impl ComponentStatus {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
        }
    }

    fn unknown() -> Self {
        Self {
            status: "unknown".to_string(),
            message: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message),
        }
    }
}

pub struct HealthChecker {
    registry: Arc<LimiterRegistry>,
}

impl HealthChecker {
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self { registry }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                store: ComponentStatus::unknown(),
                scripts: ComponentStatus::unknown(),
            },
        }
    }

    /// Readiness check - can limiters reach the store with scripts loaded?
    pub async fn readiness(&self) -> HealthStatus {
        let store = match self.registry.store().ping().await {
            Ok(()) => ComponentStatus::ok(),
            Err(e) => ComponentStatus::error(format!("Store check failed: {}", e)),
        };

        let scripts = if self.registry.is_initialized() {
            ComponentStatus::ok()
        } else {
            ComponentStatus::error("Window scripts not loaded".to_string())
        };

        let overall_status = if store.status == "ok" && scripts.status == "ok" {
            "ok"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks { store, scripts },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::MemoryStore;

    #[tokio::test]
    async fn test_readiness_requires_init() {
        let registry = Arc::new(LimiterRegistry::new(Arc::new(MemoryStore::new()), "health"));
        let checker = HealthChecker::new(registry.clone());

        let status = checker.readiness().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.checks.store.status, "ok");

        registry.init().await.unwrap();
        assert_eq!(checker.readiness().await.status, "ok");
    }
}
