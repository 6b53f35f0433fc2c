use crate::{
    api::{health, ws},
    config::CircuitBreakerConfig,
    errors::Result,
    observability::HealthChecker,
    rate_limit::{
        rate_limit_middleware, CircuitBreaker, Exempt, LimiterRegistry, RateLimiter, RouteLimits,
        WindowSpec,
    },
};
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, MethodRouter},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub health_checker: Arc<HealthChecker>,
    pub socket_limiter: RateLimiter,
}

/// Build the demo service. `registry` must be initialized before it serves traffic.
pub fn create_router(
    registry: Arc<LimiterRegistry>,
    breaker: Option<CircuitBreakerConfig>,
    metrics_enabled: bool,
) -> Result<Router> {
    let limiter = |route: &str, index: usize, window: WindowSpec| -> Result<RateLimiter> {
        let limiter = RateLimiter::for_route(registry.clone(), route, index, window);
        match breaker {
            Some(config) => Ok(limiter.with_circuit_breaker(CircuitBreaker::new(config)?)),
            None => Ok(limiter),
        }
    };

    let index_limits =
        RouteLimits::single(limiter("/", 0, WindowSpec::per(2, Duration::from_secs(5))?)?);
    let multiple_limits = RouteLimits::new(vec![
        limiter("/multiple", 0, WindowSpec::per(1, Duration::from_secs(5))?)?,
        limiter("/multiple", 1, WindowSpec::per(2, Duration::from_secs(15))?)?,
    ]);
    let skip_limits =
        RouteLimits::single(limiter("/skip", 0, WindowSpec::per(1, Duration::from_secs(5))?)?);

    let state = AppState {
        health_checker: Arc::new(HealthChecker::new(registry.clone())),
        socket_limiter: limiter("/ws", 0, WindowSpec::per(1, Duration::from_secs(5))?)?,
    };

    let mut router: Router<AppState> = Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    if metrics_enabled {
        router = router.route("/metrics", get(health::metrics));
    }

    Ok(router
        // Limited endpoints
        .route("/", limited(get(index), index_limits))
        .route("/multiple", limited(get(multiple), multiple_limits))
        .route("/skip", limited(get(skip), skip_limits).layer(Extension(Exempt)))
        .route("/ws", get(ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn limited(route: MethodRouter<AppState>, limits: RouteLimits) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(limits, rate_limit_middleware))
}

async fn index() -> Json<Value> {
    Json(json!({ "msg": "Hello World" }))
}

async fn multiple() -> Json<Value> {
    Json(json!({ "msg": "Hello World" }))
}

async fn skip() -> Json<Value> {
    Json(json!({ "msg": "This route skips rate limiting" }))
}
