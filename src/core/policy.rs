//! Shared vocabulary for compiled policy stages.
//!
//! Filters, interceptors, rate limits and authentication all compile a
//! declarative spec into a callable at registration time. This module holds
//! what they share: the compilation error type, `appliesTo` method scoping,
//! typed parameter extraction, and the rejection produced when a stage stops a
//! request.
use std::net::{IpAddr, SocketAddr};

use axum::body::Body as AxumBody;
use http::{HeaderMap, Method, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while compiling a policy declaration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("Unknown filter kind '{0}'")]
    UnknownFilter(String),

    #[error("Unknown {side} interceptor kind '{kind}'")]
    UnknownInterceptor { side: &'static str, kind: String },

    #[error("Invalid parameters for '{kind}': {message}")]
    InvalidParams { kind: String, message: String },

    #[error("Invalid method '{0}' in appliesTo")]
    InvalidMethod(String),

    #[error("Invalid throttling policy: {0}")]
    Throttling(String),

    #[error("Invalid authentication policy: {0}")]
    Authentication(String),

    #[error("Invalid target '{0}'")]
    InvalidTarget(String),
}

/// Deserialize a stage's free-form parameters into its typed configuration.
pub fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: &Map<String, Value>,
) -> Result<T, PolicyError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| {
        PolicyError::InvalidParams {
            kind: kind.to_string(),
            message: e.to_string(),
        }
    })
}

/// The set of HTTP methods a stage is restricted to; empty means every method.
#[derive(Debug, Clone, Default)]
pub struct MethodSet(Vec<Method>);

impl MethodSet {
    pub fn parse(methods: &[String]) -> Result<Self, PolicyError> {
        methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| PolicyError::InvalidMethod(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(MethodSet)
    }

    pub fn matches(&self, method: &Method) -> bool {
        self.0.is_empty() || self.0.contains(method)
    }
}

/// A terminal, non-forwarding outcome chosen by a policy stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn with_header(mut self, name: header::HeaderName, value: header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn into_response(self) -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from(self.message));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// Resolve the caller's IP: the first `X-Forwarded-For` hop when the gateway
/// trusts an upstream proxy, otherwise the socket peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    under_proxy: bool,
) -> Option<IpAddr> {
    #[allow(clippy::collapsible_if)]
    if under_proxy {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        {
            return Some(forwarded);
        }
    }
    peer.map(|addr| addr.ip())
}
