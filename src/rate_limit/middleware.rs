use crate::errors::LimiterError;
use crate::rate_limit::limiter::RateLimiter;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Ordered limiters guarding one route.
///
/// Limiters are checked in order and the first rejection stops the request,
/// so later limiters are not charged for it.
#[derive(Clone)]
pub struct RouteLimits {
    limiters: Arc<[RateLimiter]>,
}

impl RouteLimits {
    pub fn new(limiters: Vec<RateLimiter>) -> Self {
        Self {
            limiters: limiters.into(),
        }
    }

    pub fn single(limiter: RateLimiter) -> Self {
        Self::new(vec![limiter])
    }

    pub fn limiters(&self) -> &[RateLimiter] {
        &self.limiters
    }
}

/// Rate limiting middleware.
///
/// Attach with `axum::middleware::from_fn_with_state(limits, rate_limit_middleware)`.
/// Add `axum::extract::ConnectInfo` to the server so the peer address is known.
pub async fn rate_limit_middleware(
    State(limits): State<RouteLimits>,
    request: Request,
    next: Next,
) -> Result<Response, LimiterError> {
    let (parts, body) = request.into_parts();

    for limiter in limits.limiters() {
        let decision = limiter.hit(&parts).await?;

        if !decision.allowed {
            tracing::debug!(
                path = %parts.uri.path(),
                tag = %limiter.tag(),
                "Deny callback let the request through"
            );
        }
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{LimiterRegistry, MemoryStore, WindowSpec};
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{header, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    async fn router(limit: u64) -> Router {
        let registry = Arc::new(LimiterRegistry::new(Arc::new(MemoryStore::new()), "mw"));
        registry.init().await.unwrap();
        let limits = RouteLimits::single(RateLimiter::for_route(
            registry,
            "hello",
            0,
            WindowSpec::new(limit, 60_000).unwrap(),
        ));

        Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route_layer(from_fn_with_state(limits, rate_limit_middleware))
    }

    fn request(peer: [u8; 4]) -> Request {
        let mut request = axum::http::Request::builder()
            .uri("/hello")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    #[tokio::test]
    async fn test_rejects_over_quota_with_retry_after() {
        let app = router(1).await;

        let response = app.clone().oneshot(request([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));

        // Different peer, separate quota
        let response = app.oneshot(request([10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_uninitialized_registry_is_server_error() {
        let registry = Arc::new(LimiterRegistry::new(Arc::new(MemoryStore::new()), "mw"));
        let limits = RouteLimits::single(RateLimiter::new(
            registry,
            "hello:0",
            WindowSpec::new(1, 1_000).unwrap(),
        ));
        let app = Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route_layer(from_fn_with_state(limits, rate_limit_middleware));

        let response = app.oneshot(request([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
