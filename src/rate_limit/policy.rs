use crate::errors::{LimiterError, Result};
use crate::rate_limit::identifier::RateContext;
use crate::rate_limit::window::retry_after_secs;
use async_trait::async_trait;
use std::collections::HashSet;

/// What happens when a request is over quota.
///
/// Returning `Ok(())` lets the request through anyway; returning an error
/// aborts it with that error.
#[async_trait]
pub trait DenyCallback: Send + Sync {
    async fn on_denied(&self, ctx: &dyn RateContext, retry_after_ms: i64) -> Result<()>;
}

/// Reject with "too many requests" and an advisory retry delay in seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCallback;

#[async_trait]
impl DenyCallback for DefaultCallback {
    async fn on_denied(&self, _ctx: &dyn RateContext, retry_after_ms: i64) -> Result<()> {
        Err(LimiterError::TooManyRequests {
            retry_after_secs: retry_after_secs(retry_after_ms),
        })
    }
}

/// Marker request extension: a route carrying it is never rate limited
#[derive(Debug, Clone, Copy, Default)]
pub struct Exempt;

/// Per-limiter predicate deciding whether to bypass limiting
pub trait SkipPolicy: Send + Sync {
    fn skip(&self, ctx: &dyn RateContext) -> bool;
}

impl<F> SkipPolicy for F
where
    F: Fn(&dyn RateContext) -> bool + Send + Sync,
{
    fn skip(&self, ctx: &dyn RateContext) -> bool {
        self(ctx)
    }
}

/// Skip requests whose path matches exactly
#[derive(Debug, Clone, Default)]
pub struct ExemptPaths {
    paths: HashSet<String>,
}

impl ExemptPaths {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl SkipPolicy for ExemptPaths {
    fn skip(&self, ctx: &dyn RateContext) -> bool {
        self.paths.contains(ctx.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::identifier::SocketContext;

    #[tokio::test]
    async fn test_default_callback_rejects_with_rounded_delay() {
        let ctx = SocketContext::new("/");
        let result = DefaultCallback.on_denied(&ctx, 4_200).await;
        assert!(matches!(
            result,
            Err(LimiterError::TooManyRequests {
                retry_after_secs: Some(5)
            })
        ));
    }

    #[tokio::test]
    async fn test_default_callback_permanent_bucket_has_no_delay() {
        let ctx = SocketContext::new("/");
        let result = DefaultCallback.on_denied(&ctx, -1).await;
        assert!(matches!(
            result,
            Err(LimiterError::TooManyRequests {
                retry_after_secs: None
            })
        ));
    }

    #[test]
    fn test_exempt_paths() {
        let policy = ExemptPaths::new(["/skip", "/health/live"]);
        assert!(policy.skip(&SocketContext::new("/skip")));
        assert!(!policy.skip(&SocketContext::new("/skip/nested")));
    }

    #[test]
    fn test_closure_skip_policy() {
        let policy = |ctx: &dyn RateContext| ctx.path().starts_with("/internal");
        assert!(policy.skip(&SocketContext::new("/internal/jobs")));
        assert!(!policy.skip(&SocketContext::new("/public")));
    }
}
