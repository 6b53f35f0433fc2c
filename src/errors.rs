use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure talking to the shared store, classified by what the caller may do about it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Timeouts, refused or dropped connections. These feed the circuit breaker.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store no longer has the compiled script cached.
    #[error("script not found in store cache")]
    NoScript,

    /// Malformed replies and script failures. Never absorbed by the circuit breaker.
    #[error("store logic error: {0}")]
    Logic(String),
}

impl StoreError {
    /// Whether this failure counts toward opening the circuit breaker
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::NoScript => "noscript",
            StoreError::Logic(_) => "logic",
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::NoScriptError {
            StoreError::NoScript
        } else if err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Logic(err.to_string())
        }
    }
}

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum LimiterError {
    /// Misuse of the limiter: used before initialization, bad config values.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Window durations must be non-negative.
    #[error("Invalid window: duration {duration_ms}ms is negative")]
    InvalidWindow { duration_ms: i64 },

    /// Connectivity failure the circuit breaker did not absorb
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed store reply or script failure
    #[error("Store error: {0}")]
    Store(String),

    /// Quota exceeded, raised by the default deny callback
    #[error("Too many requests")]
    TooManyRequests { retry_after_secs: Option<u64> },
}

impl From<StoreError> for LimiterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => LimiterError::StoreUnavailable(msg),
            StoreError::NoScript => LimiterError::Store(err.to_string()),
            StoreError::Logic(msg) => LimiterError::Store(msg),
        }
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::from(err).into()
    }
}

// Implement IntoResponse for Axum
impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            LimiterError::TooManyRequests { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
            }
            LimiterError::StoreUnavailable(_) => {
                tracing::error!("Rate limit store unavailable: {:?}", self);
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            LimiterError::Store(_) => {
                tracing::error!("Rate limit store error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            LimiterError::Configuration(_) | LimiterError::InvalidWindow { .. } => {
                tracing::error!("Rate limit configuration error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();

        if let LimiterError::TooManyRequests {
            retry_after_secs: Some(secs),
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, LimiterError>;
