use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tower_http::timeout::TimeoutBody;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Forces request version to HTTP/1.1 while allowing ALPN to negotiate h2
/// * Bounds every call by the route's timeout: the wait for the response head,
///   then every gap between body frames
/// * Converts between Hyper body and Axum body types
///
/// Retries and circuit breaking are not attempted here.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!("Created backend HTTP client");
        Ok(Self { client })
    }

    /// Derive a `Host` header from the URI when the caller did not set one.
    fn ensure_host(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        if req.headers().contains_key(header::HOST) {
            return Ok(());
        }
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| {
                HttpClientError::InvalidRequest(format!("Outgoing URI has no host: {}", req.uri()))
            })?
            .as_str()
            .to_string();
        let value = HeaderValue::from_str(&authority)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::ensure_host(&mut req)?;

        let client = self.client.clone();

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );

        let span = tracing::info_span!(
            "backend_request",
            backend.url = %backend_identifier,
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            let (mut parts, axum_body) = req.into_parts();
            parts.version = Version::HTTP_11;

            tracing::debug!("Sending request: {} {}", parts.method, parts.uri);
            tracing::trace!("Outgoing request headers: {:?}", parts.headers);

            let method = parts.method.clone();
            let uri = parts.uri.clone();
            let outgoing_request = Request::from_parts(parts, axum_body);

            match tokio::time::timeout(timeout, client.request(outgoing_request)).await {
                Ok(Ok(response)) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    // The body is re-framed by the inbound server
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    // A backend that stalls mid-body errors the relayed body
                    let body = TimeoutBody::new(timeout, hyper_body);
                    Ok(Response::from_parts(parts, AxumBody::new(body)))
                }
                Ok(Err(e)) => {
                    tracing::Span::current().record("http.status_code", 502u16);
                    tracing::error!(
                        "Error making request to backend {} ({} {}): {}",
                        backend_identifier,
                        method,
                        uri,
                        e
                    );
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {uri} failed: {e}"
                    )))
                }
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 504u16);
                    tracing::warn!(
                        "Backend {} did not respond to {} {} within {:?}",
                        backend_identifier,
                        method,
                        uri,
                        timeout
                    );
                    Err(HttpClientError::Timeout(timeout))
                }
            }
        }
        .instrument(span)
        .await
    }
}
