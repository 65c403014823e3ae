//! Route-scoped rate limiting built atop `governor`.
//!
//! One [`RouteRateLimiter`] is compiled per API at registration time from its
//! `throttling` block and embedded in the API's proxy handler, so limiter
//! state is replaced together with the route on re-registration. The limiter
//! is keyed by route (one shared bucket), by client IP, or by the value of a
//! request header.
use std::{hash::Hash, net::IpAddr, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed, keyed::DefaultKeyedStateStore},
};
use http::{HeaderName, StatusCode, request::Parts};

use crate::{
    config::models::{ThrottleKey, ThrottlingConfig},
    core::policy::{PolicyError, Rejection},
};

/// Bundles a concrete governor limiter with the response sent on violation.
pub struct LimiterWrapper<RL> {
    pub limiter: RL,
    pub rejection: Rejection,
}

pub type DirectRateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

/// Non-keyed (global per route) limiter variant.
pub type RouteSpecificLimiter = LimiterWrapper<DirectRateLimiterImpl>;
/// Per-client-IP keyed limiter variant.
pub type IpLimiter = LimiterWrapper<KeyedRateLimiterImpl<IpAddr>>;
/// Per-header-value keyed limiter variant.
pub type HeaderLimiter = LimiterWrapper<KeyedRateLimiterImpl<String>>;

impl LimiterWrapper<DirectRateLimiterImpl> {
    pub fn check_route(&self) -> Result<(), Rejection> {
        self.limiter
            .check()
            .map_err(|_| self.rejection.clone())
    }
}

impl<K> LimiterWrapper<KeyedRateLimiterImpl<K>>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
{
    fn check_keyed(&self, key: &K) -> Result<(), Rejection> {
        self.limiter
            .check_key(key)
            .map_err(|_| self.rejection.clone())
    }
}

/// Discriminated union over supported limiter types.
#[derive(Clone)]
pub enum RouteRateLimiter {
    Route(Arc<RouteSpecificLimiter>),
    Ip(Arc<IpLimiter>),
    Header {
        limiter: Arc<HeaderLimiter>,
        header_name: HeaderName,
    },
}

impl std::fmt::Debug for RouteRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteRateLimiter::Route(_) => f.write_str("RouteRateLimiter::Route"),
            RouteRateLimiter::Ip(_) => f.write_str("RouteRateLimiter::Ip"),
            RouteRateLimiter::Header { header_name, .. } => {
                write!(f, "RouteRateLimiter::Header({header_name})")
            }
        }
    }
}

impl RouteRateLimiter {
    /// Build a limiter allowing `max` requests per `timeWindow`.
    ///
    /// The quota replenishes one cell every `timeWindow / max` and allows a
    /// burst of `max`, so a full window's worth of requests may arrive at once.
    pub fn new(config: &ThrottlingConfig) -> Result<Self, PolicyError> {
        let window = humantime::parse_duration(&config.time_window).map_err(|e| {
            PolicyError::Throttling(format!(
                "Invalid timeWindow '{window}': {e}",
                window = config.time_window
            ))
        })?;

        let max = u32::try_from(config.max)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                PolicyError::Throttling(format!(
                    "'max' must be between 1 and {}, got {}",
                    u32::MAX,
                    config.max
                ))
            })?;

        let replenish = window / max.get();
        let quota = Quota::with_period(replenish.max(Duration::from_nanos(1)))
            .ok_or_else(|| PolicyError::Throttling(format!("Invalid timeWindow {window:?}")))?
            .allow_burst(max);

        let status = StatusCode::from_u16(config.status_code).map_err(|_| {
            PolicyError::Throttling(format!("Invalid status code: {}", config.status_code))
        })?;
        let rejection = Rejection::new(status, config.message.clone());

        tracing::debug!(
            by = ?config.by,
            max = config.max,
            time_window = %config.time_window,
            status_code = config.status_code,
            "Creating rate limiter"
        );

        match config.by {
            ThrottleKey::Route => Ok(RouteRateLimiter::Route(Arc::new(LimiterWrapper {
                limiter: RateLimiter::direct(quota),
                rejection,
            }))),
            ThrottleKey::Ip => Ok(RouteRateLimiter::Ip(Arc::new(LimiterWrapper {
                limiter: RateLimiter::keyed(quota),
                rejection,
            }))),
            ThrottleKey::Header => {
                let header_name_str = config.header_name.as_ref().ok_or_else(|| {
                    PolicyError::Throttling("headerName is required when by=header".to_string())
                })?;
                let header_name =
                    HeaderName::from_bytes(header_name_str.as_bytes()).map_err(|e| {
                        PolicyError::Throttling(format!(
                            "Invalid headerName '{header_name_str}': {e}"
                        ))
                    })?;
                Ok(RouteRateLimiter::Header {
                    limiter: Arc::new(LimiterWrapper {
                        limiter: RateLimiter::keyed(quota),
                        rejection,
                    }),
                    header_name,
                })
            }
        }
    }

    /// Enforce this limiter against a request.
    ///
    /// Requests without a usable key (unknown client IP, missing header) share
    /// a single anonymous bucket rather than bypassing the limit.
    pub fn check(&self, req: &Parts, client_ip: Option<IpAddr>) -> Result<(), Rejection> {
        match self {
            RouteRateLimiter::Route(limiter) => limiter.check_route(),
            RouteRateLimiter::Ip(limiter) => {
                let key = client_ip.unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
                limiter.check_keyed(&key)
            }
            RouteRateLimiter::Header {
                limiter,
                header_name,
            } => {
                let key = req
                    .headers
                    .get(header_name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                limiter.check_keyed(&key)
            }
        }
    }
}

/// Rate-limit subsystem entry point.
pub struct ApiRateLimit;

impl ApiRateLimit {
    /// Compile the throttling policy of the API mounted on `public_path`.
    /// Invoked once per registration.
    pub fn configure(
        public_path: &str,
        throttling: &ThrottlingConfig,
    ) -> Result<RouteRateLimiter, PolicyError> {
        tracing::debug!(path = %public_path, "Configuring rate limit");
        RouteRateLimiter::new(throttling)
    }
}
