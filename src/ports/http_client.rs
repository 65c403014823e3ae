use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the backend does not answer within the route's timeout
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Gateway-originated status reported to the caller for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpClientError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HttpClientError::ConnectionError(_) | HttpClientError::InvalidRequest(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The fully rewritten outbound request (absolute URI)
    /// * `timeout` - Upper bound for receiving the response head
    ///
    /// # Returns
    /// A future that resolves to the backend's response or an error. Dropping
    /// the future aborts the backend call.
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        timeout: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}
