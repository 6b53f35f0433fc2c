use crate::errors::{LimiterError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::circuit_breaker::CircuitBreaker;
use crate::rate_limit::identifier::{Identifier, RateContext};
use crate::rate_limit::policy::{DenyCallback, SkipPolicy};
use crate::rate_limit::registry::LimiterRegistry;
use crate::rate_limit::window::{Algorithm, Decision, RateKey, WindowSpec};
use std::sync::Arc;
use std::time::Duration;

/// Waits a blocking limiter makes before handing a denial to the callback
const BLOCKING_ATTEMPTS: u32 = 3;

/// One configured limit, attached to a route or socket handler.
///
/// The tag is mixed into every key so that several limiters on the same
/// route keep separate counts. It must be stable across processes.
#[derive(Clone)]
pub struct RateLimiter {
    registry: Arc<LimiterRegistry>,
    tag: String,
    window: WindowSpec,
    algorithm: Algorithm,
    identifier: Option<Arc<dyn Identifier>>,
    callback: Option<Arc<dyn DenyCallback>>,
    skip: Option<Arc<dyn SkipPolicy>>,
    breaker: Option<Arc<CircuitBreaker>>,
    blocking: bool,
}

impl RateLimiter {
    /// Create a fixed window limiter
    pub fn new(
        registry: Arc<LimiterRegistry>,
        tag: impl Into<String>,
        window: WindowSpec,
    ) -> Self {
        Self {
            registry,
            tag: tag.into(),
            window,
            algorithm: Algorithm::FixedWindow,
            identifier: None,
            callback: None,
            skip: None,
            breaker: None,
            blocking: false,
        }
    }

    /// Limiter number `index` on `route`, tagged `{route}:{index}`
    pub fn for_route(
        registry: Arc<LimiterRegistry>,
        route: &str,
        index: usize,
        window: WindowSpec,
    ) -> Self {
        Self::new(registry, format!("{}:{}", route, index), window)
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn DenyCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_skip(mut self, skip: Arc<dyn SkipPolicy>) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Fail open while the store is unreachable
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(Arc::new(breaker));
        self
    }

    /// Wait for a free slot instead of rejecting straight away
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn window(&self) -> WindowSpec {
        self.window
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_deref()
    }

    /// Key holding this limiter's count for `identifier`
    pub fn key_for(&self, identifier: &str) -> RateKey {
        RateKey::new(self.registry.prefix(), identifier, &self.tag)
    }

    /// Admission decision for `key` under `window`.
    ///
    /// Denial is a normal `Decision`. Errors are store or configuration faults;
    /// connectivity faults become an allow once the circuit breaker opens.
    pub async fn check(&self, key: &RateKey, window: WindowSpec) -> Result<Decision> {
        self.registry.ensure_initialized()?;

        if let Some(breaker) = &self.breaker {
            if !breaker.allow_request() {
                tracing::debug!(key = %key, "Circuit breaker open, allowing request");
                MetricsRecorder::record_fail_open();
                return Ok(Decision::allow());
            }
        }

        match self.registry.evaluate(self.algorithm, key, window).await {
            Ok(decision) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                MetricsRecorder::record_decision(self.algorithm.as_str(), decision.outcome());
                Ok(decision)
            }
            Err(LimiterError::StoreUnavailable(msg)) => {
                MetricsRecorder::record_store_error("unavailable");
                let opened = self
                    .breaker
                    .as_ref()
                    .is_some_and(|breaker| breaker.record_failure());

                if opened {
                    tracing::warn!(key = %key, error = %msg, "Store unavailable, failing open");
                    MetricsRecorder::record_fail_open();
                    Ok(Decision::allow())
                } else {
                    Err(LimiterError::StoreUnavailable(msg))
                }
            }
            Err(err) => {
                if let LimiterError::Store(_) = err {
                    MetricsRecorder::record_store_error("logic");
                }
                Err(err)
            }
        }
    }

    /// Count one request from `ctx` against this limiter's window.
    ///
    /// On denial the deny callback decides the result; the default one
    /// fails with [`LimiterError::TooManyRequests`].
    pub async fn hit(&self, ctx: &dyn RateContext) -> Result<Decision> {
        self.hit_with(ctx, None).await
    }

    /// Count one WebSocket message. `context_key` separates independent
    /// streams sharing a connection (e.g. per channel); pass "" for none.
    pub async fn hit_message(
        &self,
        ctx: &dyn RateContext,
        context_key: &str,
    ) -> Result<Decision> {
        self.hit_with(ctx, Some(context_key)).await
    }

    async fn hit_with(
        &self,
        ctx: &dyn RateContext,
        context_key: Option<&str>,
    ) -> Result<Decision> {
        if ctx.is_exempt() || self.skip.as_ref().is_some_and(|skip| skip.skip(ctx)) {
            tracing::trace!(path = %ctx.path(), tag = %self.tag, "Rate limiting skipped");
            return Ok(Decision::allow());
        }

        let identifier = match &self.identifier {
            Some(identifier) => identifier.identify(ctx),
            None => self.registry.identifier().identify(ctx),
        };

        let key = match context_key {
            Some(context) => RateKey::new(
                self.registry.prefix(),
                &identifier,
                &format!("{}:ws:{}", self.tag, context),
            ),
            None => self.key_for(&identifier),
        };

        let mut decision = self.check(&key, self.window).await?;

        if self.blocking {
            let mut waits = 0;
            while !decision.allowed && waits < BLOCKING_ATTEMPTS {
                // A bucket with no expiry never frees up
                let Ok(wait_ms) = u64::try_from(decision.retry_after_ms) else {
                    break;
                };
                waits += 1;

                tracing::debug!(
                    key = %key,
                    wait_ms = %wait_ms,
                    attempt = %waits,
                    "Waiting for a free slot"
                );

                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                decision = self.check(&key, self.window).await?;
            }
        }

        if !decision.allowed {
            tracing::warn!(
                key = %key,
                limit = %self.window.limit(),
                retry_after_ms = %decision.retry_after_ms,
                "Rate limit exceeded"
            );

            match &self.callback {
                Some(callback) => callback.on_denied(ctx, decision.retry_after_ms).await?,
                None => {
                    self.registry
                        .callback()
                        .on_denied(ctx, decision.retry_after_ms)
                        .await?
                }
            }
        }

        Ok(decision)
    }
}
