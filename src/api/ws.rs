use crate::errors::{LimiterError, Result};
use crate::rate_limit::{RateLimiter, SocketContext};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, Uri},
    response::Response,
};
use std::net::SocketAddr;

const LIMITED_REPLY: &str = "Hello again, you are rate limited";

/// GET /ws - Echo socket, every text message counts against the socket limiter
pub async fn upgrade(
    State(limiter): State<RateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let mut ctx = SocketContext::new(uri.path()).with_headers(headers);
    if let Some(ConnectInfo(addr)) = connect_info {
        ctx = ctx.with_peer(addr.ip());
    }

    ws.on_upgrade(move |socket| serve(socket, limiter, ctx))
}

async fn serve(mut socket: WebSocket, limiter: RateLimiter, ctx: SocketContext) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };

        let reply = match reply_to(&limiter, &ctx, &text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Closing socket after limiter failure");
                break;
            }
        };

        if socket.send(Message::Text(reply)).await.is_err() {
            break;
        }
    }
}

/// Reply for one text message. Over-quota messages get a notice instead of
/// an echo; store and configuration faults close the socket.
async fn reply_to(limiter: &RateLimiter, ctx: &SocketContext, text: &str) -> Result<String> {
    match limiter.hit_message(ctx, "").await {
        Ok(_) => Ok(format!("Hello, you sent {}", text)),
        Err(LimiterError::TooManyRequests { .. }) => Ok(LIMITED_REPLY.to_string()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{LimiterRegistry, ManualClock, MemoryStore, WindowSpec};
    use std::sync::Arc;
    use std::time::Duration;

    async fn socket_limiter(clock: &ManualClock) -> RateLimiter {
        let store = MemoryStore::with_clock(clock.clone());
        let registry = Arc::new(LimiterRegistry::new(Arc::new(store), "ws"));
        registry.init().await.unwrap();
        RateLimiter::for_route(registry, "/ws", 0, WindowSpec::new(1, 5_000).unwrap())
    }

    #[tokio::test]
    async fn test_messages_limited_then_allowed_again() {
        let clock = ManualClock::new(1_000_000);
        let limiter = socket_limiter(&clock).await;
        let ctx = SocketContext::new("/ws").with_peer("10.2.0.1".parse().unwrap());

        assert_eq!(
            reply_to(&limiter, &ctx, "Hi").await.unwrap(),
            "Hello, you sent Hi"
        );
        assert_eq!(reply_to(&limiter, &ctx, "Hi").await.unwrap(), LIMITED_REPLY);

        clock.advance(Duration::from_secs(5));
        assert_eq!(
            reply_to(&limiter, &ctx, "Again").await.unwrap(),
            "Hello, you sent Again"
        );
    }

    #[tokio::test]
    async fn test_limiter_fault_is_not_a_reply() {
        let registry = Arc::new(LimiterRegistry::new(Arc::new(MemoryStore::new()), "ws"));
        let limiter =
            RateLimiter::for_route(registry, "/ws", 0, WindowSpec::new(1, 5_000).unwrap());

        let result = reply_to(&limiter, &SocketContext::new("/ws"), "Hi").await;
        assert!(matches!(result, Err(LimiterError::Configuration(_))));
    }
}
