//! Proxy composition.
//!
//! [`ProxyComposer`] turns one [`ApiDefinition`] into a [`ComposedProxyHandler`]:
//! the compiled throttling, authentication, filter chain and interceptors plus
//! the static forwarding parameters. Handlers are immutable once built; a
//! re-registration builds a fresh handler and swaps it into the registry.
//!
//! Per request the handler runs, in order: rate limit, authentication, filter
//! chain, outbound request construction, request decorator, backend call
//! (bounded by the route timeout), response interceptor. Any stage before the
//! backend call may end the request with a rejection, in which case the
//! backend is never contacted. Dropping the handler future (caller went away)
//! drops the backend call with it.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use http::{
    HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, header,
    request::Parts,
};
use tracing::Instrument;

use crate::{
    config::models::ApiDefinition,
    core::{
        auth::{ApiAuth, Authenticator},
        backend::BackendUrl,
        filter::{FilterChain, FilterContext, FilterOutcome, FilterRegistry},
        interceptor::{InterceptorRegistry, RequestDecorator, ResponseTransformer},
        policy::{PolicyError, Rejection, client_ip},
        rate_limiter::{ApiRateLimit, RouteRateLimiter},
        registry::ApiRegistry,
    },
    ports::http_client::{HttpClient, HttpClientError},
    utils::{forward_uri, match_suffix, normalize_path},
};

const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// The installed, per-API request pipeline.
pub struct ComposedProxyHandler {
    api_key: String,
    api_name: String,
    public_path: String,
    target: BackendUrl,
    timeout: Duration,
    preserve_host: bool,
    under_proxy: bool,
    rate_limiter: Option<RouteRateLimiter>,
    authenticator: Option<Authenticator>,
    filters: FilterChain,
    decorator: Option<RequestDecorator>,
    response_interceptor: Option<ResponseTransformer>,
    http_client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for ComposedProxyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedProxyHandler")
            .field("api_key", &self.api_key)
            .field("public_path", &self.public_path)
            .field("target", &self.target.as_str())
            .field("timeout", &self.timeout)
            .field("filters", &self.filters)
            .field("decorator", &self.decorator)
            .field("response_interceptor", &self.response_interceptor)
            .finish_non_exhaustive()
    }
}

impl ComposedProxyHandler {
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Normalized public path this handler is mounted on.
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    pub fn target(&self) -> &BackendUrl {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the full pipeline for one inbound request.
    pub async fn handle(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let (parts, body) = req.into_parts();
        let Some(suffix) = match_suffix(&self.public_path, parts.uri.path()) else {
            return Rejection::new(StatusCode::NOT_FOUND, "Not Found").into_response();
        };
        let suffix = suffix.to_string();
        let caller_ip = client_ip(&parts.headers, client_addr, self.under_proxy);

        if let Some(limiter) = &self.rate_limiter {
            if let Err(rejection) = limiter.check(&parts, caller_ip) {
                tracing::debug!(api = %self.api_name, "Request throttled");
                return rejection.into_response();
            }
        }

        if let Some(authenticator) = &self.authenticator {
            if let Err(rejection) = authenticator.authenticate(&parts) {
                tracing::debug!(api = %self.api_name, "Request failed authentication");
                return rejection.into_response();
            }
        }

        let mut ctx = FilterContext::new(caller_ip, &suffix);
        if let FilterOutcome::Reject(rejection) = self.filters.evaluate(&parts, &mut ctx) {
            return rejection.into_response();
        }

        let method = parts.method.clone();
        let mut outbound = match self.outbound_request(parts, body, &suffix, client_addr) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(api = %self.api_name, error = %e, "Failed to build backend request");
                return Rejection::new(e.status_code(), "Bad Gateway").into_response();
            }
        };

        if let Some(decorator) = &self.decorator {
            decorator.apply(&mut outbound);
        }

        let span = tracing::debug_span!(
            "proxy",
            api = %self.api_key,
            target = %outbound.uri(),
        );
        let result = self
            .http_client
            .send_request(outbound, self.timeout)
            .instrument(span)
            .await;

        match result {
            Ok(mut response) => {
                strip_hop_by_hop(response.headers_mut());
                if let Some(interceptor) = &self.response_interceptor {
                    interceptor.apply(&method, &mut response);
                }
                response
            }
            Err(e) => {
                tracing::warn!(api = %self.api_name, error = %e, "Backend request failed");
                upstream_error(&e)
            }
        }
    }

    /// Rewrite the inbound request into the request sent to the backend.
    fn outbound_request(
        &self,
        mut parts: Parts,
        body: AxumBody,
        suffix: &str,
        client_addr: Option<SocketAddr>,
    ) -> Result<Request<AxumBody>, HttpClientError> {
        let uri_str = forward_uri(self.target.as_str(), suffix, parts.uri.query());
        let uri: Uri = uri_str
            .parse()
            .map_err(|e| HttpClientError::InvalidRequest(format!("{uri_str}: {e}")))?;

        let original_host = parts
            .headers
            .get(header::HOST)
            .cloned()
            .or_else(|| {
                parts
                    .uri
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });
        let original_proto = parts.uri.scheme_str().unwrap_or("http").to_string();

        let headers = &mut parts.headers;
        strip_hop_by_hop(headers);

        if let Some(ip) = client_addr.map(|addr| addr.ip()) {
            let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) if self.under_proxy => format!("{existing}, {ip}"),
                _ => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR.clone(), value);
            }
        }
        if !self.under_proxy || !headers.contains_key(&X_FORWARDED_HOST) {
            if let Some(host) = &original_host {
                headers.insert(X_FORWARDED_HOST.clone(), host.clone());
            }
        }
        if !self.under_proxy || !headers.contains_key(&X_FORWARDED_PROTO) {
            if let Ok(value) = HeaderValue::from_str(&original_proto) {
                headers.insert(X_FORWARDED_PROTO.clone(), value);
            }
        }

        let host = if self.preserve_host {
            original_host
        } else {
            self.target.host_header()
        };
        match host {
            Some(host) => {
                headers.insert(header::HOST, host);
            }
            None => {
                headers.remove(header::HOST);
            }
        }

        parts.uri = uri;
        Ok(Request::from_parts(parts, body))
    }
}

fn upstream_error(error: &HttpClientError) -> Response<AxumBody> {
    let message = match error {
        HttpClientError::Timeout(_) => "Gateway Timeout",
        _ => "Bad Gateway",
    };
    Rejection::new(error.status_code(), message).into_response()
}

/// Builds and installs composed proxy handlers.
#[derive(Clone)]
pub struct ProxyComposer {
    filters: FilterRegistry,
    interceptors: InterceptorRegistry,
    http_client: Arc<dyn HttpClient>,
    default_timeout: Duration,
    under_proxy: bool,
}

impl ProxyComposer {
    /// A composer using the built-in filter and interceptor kinds.
    pub fn new(http_client: Arc<dyn HttpClient>, default_timeout: Duration, under_proxy: bool) -> Self {
        Self {
            filters: FilterRegistry::new(),
            interceptors: InterceptorRegistry::new(),
            http_client,
            default_timeout,
            under_proxy,
        }
    }

    /// Replace the filter and interceptor kind registries.
    pub fn with_registries(mut self, filters: FilterRegistry, interceptors: InterceptorRegistry) -> Self {
        self.filters = filters;
        self.interceptors = interceptors;
        self
    }

    /// Compile every policy stage of `api` into a handler.
    ///
    /// Fails without side effects if any stage cannot be compiled.
    pub fn compose(&self, api: &ApiDefinition) -> Result<ComposedProxyHandler, PolicyError> {
        let api_key = api.api_key();
        let public_path = normalize_path(&api.proxy.path);
        let proxy = &api.proxy;

        let target = BackendUrl::new(&proxy.target.path, proxy.https)
            .map_err(|e| PolicyError::InvalidTarget(e.to_string()))?;
        let timeout = match &proxy.timeout {
            Some(spec) => spec.to_duration().map_err(|message| PolicyError::InvalidParams {
                kind: "timeout".to_string(),
                message,
            })?,
            None => self.default_timeout,
        };

        let rate_limiter = api
            .throttling
            .as_ref()
            .map(|throttling| ApiRateLimit::configure(&public_path, throttling))
            .transpose()?;
        let authenticator = api
            .authentication
            .as_ref()
            .map(|auth| ApiAuth::configure(&api_key, &public_path, auth))
            .transpose()?;

        let filters = self.filters.build_chain(&proxy.filter)?;
        tracing::debug!(api = %api.name, filters = ?filters.names(), "Compiled filter chain");
        let interceptors = self.interceptors.build(&proxy.interceptor)?;

        Ok(ComposedProxyHandler {
            api_key,
            api_name: api.name.clone(),
            public_path,
            target,
            timeout,
            preserve_host: proxy.preserve_host_header,
            under_proxy: self.under_proxy,
            rate_limiter,
            authenticator,
            filters,
            decorator: interceptors.request,
            response_interceptor: interceptors.response,
            http_client: self.http_client.clone(),
        })
    }

    /// Normalize, compose and install `api`, atomically replacing any handler
    /// previously registered under the same key or public path.
    pub fn install(&self, mut api: ApiDefinition, registry: &ApiRegistry) -> Result<String, PolicyError> {
        api.proxy.path = normalize_path(&api.proxy.path);
        tracing::info!("Configuring API [{}] on path: {}", api.name, api.proxy.path);
        let handler = self.compose(&api)?;
        Ok(registry.register(api, handler))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use super::*;
    use crate::{config::FilterSpec, ports::http_client::HttpClientResult};

    #[derive(Default)]
    struct MockClient {
        seen: Mutex<Vec<Request<()>>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            timeout: Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            let (parts, _) = req.into_parts();
            self.seen.lock().unwrap().push(Request::from_parts(parts, ()));
            if let Some(delay) = self.delay {
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(HttpClientError::Timeout(timeout));
                }
            }
            Ok(Response::new(AxumBody::from(r#"{"id":123}"#)))
        }
    }

    fn api(value: serde_json::Value) -> ApiDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn orders_api() -> ApiDefinition {
        api(serde_json::json!({
            "name": "orders",
            "proxy": {"path": "/orders", "target": {"path": "http://localhost:9000"}}
        }))
    }

    fn composer(client: Arc<MockClient>) -> ProxyComposer {
        ProxyComposer::new(client, Duration::from_secs(30), false)
    }

    fn request(uri: &str) -> Request<AxumBody> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .header(header::CONNECTION, "keep-alive")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn forwards_suffix_and_query_to_target() {
        let client = Arc::new(MockClient::default());
        let handler = composer(client.clone()).compose(&orders_api()).unwrap();
        assert_eq!(handler.public_path(), "/orders/");

        let peer: SocketAddr = "192.0.2.10:4000".parse().unwrap();
        let response = handler.handle(request("/orders/123?x=1"), Some(peer)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"id":123}"#);

        let seen = client.seen.lock().unwrap();
        let forwarded = &seen[0];
        assert_eq!(forwarded.uri(), "http://localhost:9000/123?x=1");
        assert_eq!(forwarded.headers()[header::HOST], "localhost:9000");
        assert_eq!(forwarded.headers()["x-forwarded-for"], "192.0.2.10");
        assert_eq!(forwarded.headers()["x-forwarded-host"], "gateway.local");
        assert!(forwarded.headers().get(header::CONNECTION).is_none());
    }

    #[tokio::test]
    async fn preserve_host_keeps_caller_host() {
        let client = Arc::new(MockClient::default());
        let mut definition = orders_api();
        definition.proxy.preserve_host_header = true;
        let handler = composer(client.clone()).compose(&definition).unwrap();

        handler.handle(request("/orders/1"), None).await;
        assert_eq!(
            client.seen.lock().unwrap()[0].headers()[header::HOST],
            "gateway.local"
        );
    }

    #[tokio::test]
    async fn rejected_requests_never_reach_the_backend() {
        let client = Arc::new(MockClient::default());
        let mut definition = orders_api();
        definition.proxy.filter = vec![
            FilterSpec::new("methodFilter").param("allow", vec!["POST"]),
        ];
        let handler = composer(client.clone()).compose(&definition).unwrap();

        let response = handler.handle(request("/orders/1"), None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn decorator_headers_reach_the_backend() {
        let client = Arc::new(MockClient::default());
        let definition = api(serde_json::json!({
            "name": "orders",
            "proxy": {
                "path": "/orders",
                "target": {"path": "http://localhost:9000"},
                "interceptor": {
                    "request": [{"name": "addHeader", "header": "X-Test", "value": "1"}],
                    "response": [{"name": "addHeader", "header": "X-Served-By", "value": "canopy"}]
                }
            }
        }));
        let handler = composer(client.clone()).compose(&definition).unwrap();

        let response = handler.handle(request("/orders/1"), None).await;
        assert_eq!(response.headers()["x-served-by"], "canopy");
        assert_eq!(client.seen.lock().unwrap()[0].headers()["x-test"], "1");
    }

    #[tokio::test]
    async fn backend_timeout_maps_to_gateway_timeout() {
        let client = Arc::new(MockClient {
            delay: Some(Duration::from_secs(60)),
            ..MockClient::default()
        });
        let mut definition = orders_api();
        definition.proxy.timeout = Some(Duration::from_millis(20).into());
        let handler = composer(client).compose(&definition).unwrap();

        let response = handler.handle(request("/orders/1"), None).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn throttling_and_auth_run_before_filters() {
        let client = Arc::new(MockClient::default());
        let definition = api(serde_json::json!({
            "name": "orders",
            "proxy": {"path": "/orders", "target": {"path": "http://localhost:9000"}},
            "throttling": {"max": 1, "timeWindow": "1h"},
            "authentication": {"strategy": "apiKey", "keys": ["k1"]}
        }));
        let handler = composer(client.clone()).compose(&definition).unwrap();

        let response = handler.handle(request("/orders/1"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = handler.handle(request("/orders/1"), None).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_filter_fails_composition() {
        let client = Arc::new(MockClient::default());
        let mut definition = orders_api();
        definition.proxy.filter = vec![FilterSpec::new("doesNotExist")];
        assert!(matches!(
            composer(client).compose(&definition),
            Err(PolicyError::UnknownFilter(_))
        ));
    }

    #[test]
    fn strip_hop_by_hop_honours_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }
}
