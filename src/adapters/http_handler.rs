use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request},
    http::{StatusCode, header},
    middleware,
    routing::any,
};
use hyper::Response;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{
    adapters::middleware::{request_id_middleware, request_timing_middleware},
    core::registry::ApiRegistry,
};

/// Shared HTTP listener entry point: dispatches every request to the
/// registered API whose public path matches.
#[derive(Clone)]
pub struct HttpHandler {
    registry: Arc<ApiRegistry>,
}

impl HttpHandler {
    pub fn new(registry: Arc<ApiRegistry>) -> Self {
        Self { registry }
    }

    /// Route one request. Never fails: every outcome is an HTTP response.
    pub async fn handle_request(
        &self,
        req: Request,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        // Resolved against the snapshot current at arrival; a concurrent
        // re-registration only affects later requests.
        match self.registry.route(&path) {
            Some(handler) => handler.handle(req, client_addr).await,
            None => {
                tracing::debug!("No API registered for {}", path);
                not_found(&path)
            }
        }
    }

    /// Build the axum router serving every path through this handler.
    ///
    /// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
    /// peer address reaches filters and rate limiters.
    pub fn router(self) -> Router {
        let handler = Arc::new(self);
        let route = move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
            let handler = handler.clone();
            async move { handler.handle_request(req, Some(client_addr)).await }
        };

        Router::new()
            .route("/", any(route.clone()))
            .route("/{*path}", any(route))
            .layer(middleware::from_fn(request_timing_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
    }
}

fn not_found(path: &str) -> Response<AxumBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    let mut response = Response::new(AxumBody::from(body.to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
