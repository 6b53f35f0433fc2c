use crate::errors::{LimiterError, Result, StoreError};
use crate::observability::MetricsRecorder;
use crate::rate_limit::identifier::{DefaultIdentifier, Identifier};
use crate::rate_limit::policy::{DefaultCallback, DenyCallback};
use crate::rate_limit::scripts::WindowScript;
use crate::rate_limit::store::ScriptStore;
use crate::rate_limit::window::{Algorithm, Decision, RateKey, WindowSpec};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Script hashes returned by the store at init
#[derive(Debug)]
struct LoadedScripts {
    fixed_window: String,
    sliding_window: String,
}

impl LoadedScripts {
    fn hash(&self, algorithm: Algorithm) -> &str {
        match algorithm {
            Algorithm::FixedWindow => &self.fixed_window,
            Algorithm::SlidingWindow => &self.sliding_window,
        }
    }
}

/// Process-wide limiter settings shared by every [`RateLimiter`](crate::rate_limit::RateLimiter).
///
/// Built once at startup and handed to limiters explicitly. Must be
/// [`init`](Self::init)ialized before the first check.
pub struct LimiterRegistry {
    store: Arc<dyn ScriptStore>,
    prefix: String,
    identifier: Arc<dyn Identifier>,
    callback: Arc<dyn DenyCallback>,
    scripts: OnceCell<LoadedScripts>,
}

impl LimiterRegistry {
    pub fn new(store: Arc<dyn ScriptStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            identifier: Arc::new(DefaultIdentifier),
            callback: Arc::new(DefaultCallback),
            scripts: OnceCell::new(),
        }
    }

    /// Default identifier for limiters that do not set their own
    pub fn with_identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifier = identifier;
        self
    }

    /// Default deny callback for limiters that do not set their own
    pub fn with_callback(mut self, callback: Arc<dyn DenyCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Load the window scripts into the store. Calling it again is a no-op.
    pub async fn init(&self) -> Result<()> {
        if self.scripts.get().is_some() {
            return Ok(());
        }

        let fixed_window = self
            .store
            .load_script(WindowScript::for_algorithm(Algorithm::FixedWindow))
            .await?;
        let sliding_window = self
            .store
            .load_script(WindowScript::for_algorithm(Algorithm::SlidingWindow))
            .await?;

        // A concurrent init may have won; both loaded identical scripts
        let _ = self.scripts.set(LoadedScripts {
            fixed_window,
            sliding_window,
        });

        tracing::info!(prefix = %self.prefix, "Rate limiter registry initialized");

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.scripts.get().is_some()
    }

    fn loaded(&self) -> Result<&LoadedScripts> {
        self.scripts.get().ok_or_else(|| {
            LimiterError::Configuration(
                "rate limiter registry used before init()".to_string(),
            )
        })
    }

    /// Fail fast with a configuration error before any store work
    pub fn ensure_initialized(&self) -> Result<()> {
        self.loaded().map(|_| ())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn identifier(&self) -> &dyn Identifier {
        self.identifier.as_ref()
    }

    pub fn callback(&self) -> &dyn DenyCallback {
        self.callback.as_ref()
    }

    pub fn store(&self) -> &dyn ScriptStore {
        self.store.as_ref()
    }

    /// Run one window script for `key`.
    ///
    /// If the store lost the script, it is reloaded and the call retried once.
    pub async fn evaluate(
        &self,
        algorithm: Algorithm,
        key: &RateKey,
        window: WindowSpec,
    ) -> Result<Decision> {
        let hash = self.loaded()?.hash(algorithm);
        let limit = window.limit();
        let duration_ms = window.duration_ms();

        let reply = match self
            .store
            .eval_script(hash, key.as_str(), limit, duration_ms)
            .await
        {
            Err(StoreError::NoScript) => {
                tracing::warn!(
                    key = %key,
                    algorithm = %algorithm,
                    "Window script missing from store cache, reloading"
                );
                MetricsRecorder::record_script_reload();

                let hash = self
                    .store
                    .load_script(WindowScript::for_algorithm(algorithm))
                    .await?;

                match self
                    .store
                    .eval_script(&hash, key.as_str(), limit, duration_ms)
                    .await
                {
                    Err(StoreError::NoScript) => {
                        return Err(LimiterError::Store(
                            "window script still missing after reload".to_string(),
                        ))
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        let decision = Decision::from_reply(&reply)?;

        tracing::debug!(
            key = %key,
            algorithm = %algorithm,
            allowed = %decision.allowed,
            retry_after_ms = %decision.retry_after_ms,
            "Rate limit check result"
        );

        Ok(decision)
    }

    /// Remaining lifetime of a key's counting state, in milliseconds
    pub async fn ttl(&self, key: &RateKey) -> Result<i64> {
        Ok(self.store.pttl(key.as_str()).await?)
    }

    /// Drop a key's counting state
    pub async fn reset(&self, key: &RateKey) -> Result<()> {
        self.store.delete(key.as_str()).await?;

        tracing::info!(key = %key, "Rate limit reset");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::memory::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Store that keeps losing its scripts
    struct AmnesiacStore {
        inner: MemoryStore,
        loads: Mutex<u32>,
    }

    #[async_trait]
    impl ScriptStore for AmnesiacStore {
        async fn load_script(
            &self,
            script: &WindowScript,
        ) -> std::result::Result<String, StoreError> {
            *self.loads.lock() += 1;
            self.inner.load_script(script).await
        }

        async fn eval_script(
            &self,
            _hash: &str,
            _key: &str,
            _limit: u64,
            _duration_ms: i64,
        ) -> std::result::Result<Vec<i64>, StoreError> {
            Err(StoreError::NoScript)
        }

        async fn pttl(&self, key: &str) -> std::result::Result<i64, StoreError> {
            self.inner.pttl(key).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    fn memory_registry() -> (Arc<MemoryStore>, ManualClock, LimiterRegistry) {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let registry = LimiterRegistry::new(store.clone(), "test");
        (store, clock, registry)
    }

    #[tokio::test]
    async fn test_use_before_init_is_configuration_error() {
        let (_store, _clock, registry) = memory_registry();
        let key = RateKey::new("test", "client", "route:0");
        let window = WindowSpec::new(1, 1_000).unwrap();

        assert!(!registry.is_initialized());
        let result = registry.evaluate(Algorithm::FixedWindow, &key, window).await;
        assert!(matches!(result, Err(LimiterError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (_store, _clock, registry) = memory_registry();
        registry.init().await.unwrap();
        registry.init().await.unwrap();
        assert!(registry.is_initialized());
    }

    #[tokio::test]
    async fn test_reloads_script_after_cache_flush() {
        let (store, _clock, registry) = memory_registry();
        registry.init().await.unwrap();

        let key = RateKey::new("test", "client", "route:0");
        let window = WindowSpec::new(1, 1_000).unwrap();

        store.flush_scripts();
        let decision = registry
            .evaluate(Algorithm::SlidingWindow, &key, window)
            .await
            .unwrap();
        assert!(decision.allowed);

        // Reloaded state is still counted
        let decision = registry
            .evaluate(Algorithm::SlidingWindow, &key, window)
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_reload_is_retried_only_once() {
        let store = Arc::new(AmnesiacStore {
            inner: MemoryStore::new(),
            loads: Mutex::new(0),
        });
        let registry = LimiterRegistry::new(store.clone(), "test");
        registry.init().await.unwrap();
        assert_eq!(*store.loads.lock(), 2);

        let key = RateKey::new("test", "client", "route:0");
        let result = registry
            .evaluate(Algorithm::FixedWindow, &key, WindowSpec::new(1, 1_000).unwrap())
            .await;

        assert!(matches!(result, Err(LimiterError::Store(_))));
        assert_eq!(*store.loads.lock(), 3);
    }

    #[tokio::test]
    async fn test_ttl_and_reset() {
        let (_store, clock, registry) = memory_registry();
        registry.init().await.unwrap();

        let key = RateKey::new("test", "client", "route:0");
        let window = WindowSpec::new(1, 5_000).unwrap();
        registry
            .evaluate(Algorithm::FixedWindow, &key, window)
            .await
            .unwrap();

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(registry.ttl(&key).await.unwrap(), 3_500);

        registry.reset(&key).await.unwrap();
        assert_eq!(registry.ttl(&key).await.unwrap(), -2);
        assert!(registry
            .evaluate(Algorithm::FixedWindow, &key, window)
            .await
            .unwrap()
            .allowed);
    }
}
