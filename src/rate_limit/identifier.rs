use crate::rate_limit::policy::Exempt;
use axum::extract::ConnectInfo;
use axum::http::{request::Parts, HeaderMap, HeaderValue};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Address used when neither a forwarded header nor a peer is known
pub const FALLBACK_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const FORWARDED_FOR: &str = "x-forwarded-for";

/// What a limiter can see of an inbound request or socket message
pub trait RateContext: Send + Sync {
    fn header(&self, name: &str) -> Option<&str>;

    fn peer_addr(&self) -> Option<IpAddr>;

    fn path(&self) -> &str;

    /// Routes tagged exempt are never counted
    fn is_exempt(&self) -> bool {
        false
    }
}

impl RateContext for Parts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn peer_addr(&self) -> Option<IpAddr> {
        self.extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }

    fn path(&self) -> &str {
        self.uri.path()
    }

    fn is_exempt(&self) -> bool {
        self.extensions.get::<Exempt>().is_some()
    }
}

/// Context of an established WebSocket, captured at upgrade time
#[derive(Debug, Clone, Default)]
pub struct SocketContext {
    headers: HeaderMap,
    peer: Option<IpAddr>,
    path: String,
}

impl SocketContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            headers: HeaderMap::new(),
            peer: None,
            path: path.into(),
        }
    }

    /// Snapshot the parts of an upgrade request the limiter needs
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            headers: parts.headers.clone(),
            peer: parts.peer_addr(),
            path: parts.uri.path().to_string(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl RateContext for SocketContext {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn peer_addr(&self) -> Option<IpAddr> {
        self.peer
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// Strategy turning a context into the identifier part of a rate key
pub trait Identifier: Send + Sync {
    fn identify(&self, ctx: &dyn RateContext) -> String;
}

impl<F> Identifier for F
where
    F: Fn(&dyn RateContext) -> String + Send + Sync,
{
    fn identify(&self, ctx: &dyn RateContext) -> String {
        self(ctx)
    }
}

/// Client address plus path, so a noisy endpoint cannot drain another endpoint's quota
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIdentifier;

impl Identifier for DefaultIdentifier {
    fn identify(&self, ctx: &dyn RateContext) -> String {
        format!("{}:{}", client_addr(ctx), ctx.path())
    }
}

/// Left-most `X-Forwarded-For` hop, else the peer, else loopback
pub fn client_addr(ctx: &dyn RateContext) -> String {
    let forwarded = ctx
        .header(FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match forwarded {
        Some(hop) => hop.to_string(),
        None => ctx.peer_addr().unwrap_or(FALLBACK_ADDR).to_string(),
    }
}
