pub mod circuit_breaker;
pub mod clock;
pub mod identifier;
pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod policy;
pub mod registry;
pub mod scripts;
pub mod store;
pub mod window;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identifier::{DefaultIdentifier, Identifier, RateContext, SocketContext};
pub use limiter::RateLimiter;
pub use memory::MemoryStore;
pub use middleware::{rate_limit_middleware, RouteLimits};
pub use policy::{DefaultCallback, DenyCallback, Exempt, ExemptPaths, SkipPolicy};
pub use registry::LimiterRegistry;
pub use scripts::WindowScript;
pub use store::ScriptStore;
pub use window::{Algorithm, Decision, RateKey, WindowSpec};
