pub mod auth;
pub mod backend;
pub mod filter;
pub mod gateway;
pub mod interceptor;
pub mod policy;
pub mod proxy;
pub mod rate_limiter;
pub mod registry;

pub use gateway::{Gateway, GatewayError, GatewayState};
pub use proxy::{ComposedProxyHandler, ProxyComposer};
pub use rate_limiter::RouteRateLimiter;
pub use registry::ApiRegistry;
