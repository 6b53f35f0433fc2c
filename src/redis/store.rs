// Window script execution against Redis

use crate::errors::StoreError;
use crate::rate_limit::{ScriptStore, WindowScript};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Cmd, FromRedisValue};
use std::time::Duration;

/// [`ScriptStore`] backed by a shared Redis server
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            manager,
            command_timeout,
        }
    }

    /// Run one command, treating a slow reply as a connectivity failure
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StoreError> {
        let mut manager = self.manager.clone();
        match tokio::time::timeout(self.command_timeout, cmd.query_async(&mut manager)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable(format!(
                "command timed out after {}ms",
                self.command_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn load_script(&self, script: &WindowScript) -> Result<String, StoreError> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(script.source());
        let hash: String = self.query(&cmd).await?;

        tracing::debug!(
            algorithm = %script.algorithm(),
            hash = %hash,
            "Window script loaded"
        );

        Ok(hash)
    }

    async fn eval_script(
        &self,
        hash: &str,
        key: &str,
        limit: u64,
        duration_ms: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(hash).arg(1).arg(key).arg(limit).arg(duration_ms);
        self.query(&cmd).await
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        self.query(&cmd).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{Algorithm, Decision};

    // Note: These tests require a running Redis instance
    async fn connect() -> RedisStore {
        let config = crate::config::RedisConfig {
            url: "redis://localhost:6379".to_string(),
            command_timeout_ms: 500,
            client_name: "window-limiter-tests".to_string(),
        };

        let manager = crate::redis::create_client(&config).await.unwrap();
        RedisStore::new(manager, Duration::from_millis(config.command_timeout_ms))
    }

    fn test_key(name: &str) -> String {
        format!("test:{}:{}", name, uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_fixed_window_script() {
        let store = connect().await;
        let script = WindowScript::for_algorithm(Algorithm::FixedWindow);
        let hash = store.load_script(script).await.unwrap();
        assert_eq!(hash, script.hash());

        let key = test_key("fixed");
        for _ in 0..3 {
            let reply = store.eval_script(&hash, &key, 3, 60_000).await.unwrap();
            assert!(Decision::from_reply(&reply).unwrap().allowed);
        }

        let reply = store.eval_script(&hash, &key, 3, 60_000).await.unwrap();
        let decision = Decision::from_reply(&reply).unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after_ms > 0 && decision.retry_after_ms <= 60_000);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_sliding_window_script() {
        let store = connect().await;
        let hash = store
            .load_script(WindowScript::for_algorithm(Algorithm::SlidingWindow))
            .await
            .unwrap();

        let key = test_key("sliding");
        // Same-microsecond calls must still be counted separately
        for _ in 0..5 {
            let reply = store.eval_script(&hash, &key, 5, 10_000).await.unwrap();
            assert!(Decision::from_reply(&reply).unwrap().allowed);
        }
        let reply = store.eval_script(&hash, &key, 5, 10_000).await.unwrap();
        assert!(!Decision::from_reply(&reply).unwrap().allowed);

        let ttl = store.pttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl <= 10_000);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_unknown_hash_is_noscript() {
        let store = connect().await;
        let result = store
            .eval_script("0000000000000000000000000000000000000000", "k", 1, 1_000)
            .await;
        assert_eq!(result, Err(StoreError::NoScript));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_ping() {
        let store = connect().await;
        assert!(store.ping().await.is_ok());
    }
}
