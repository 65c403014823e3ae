use std::{fmt, str::FromStr};

use http::{HeaderValue, uri::Authority};
use thiserror::Error;

/// Errors related to backend operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when URL is invalid
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A type-safe representation of a backend target address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUrl {
    /// The target URL without a trailing slash, scheme already forced if requested
    url: String,
    /// Host and port, used as the outbound `Host` header
    authority: Authority,
    /// Whether the URL is secure (HTTPS)
    is_secure: bool,
}

impl BackendUrl {
    /// Creates a new BackendUrl if the provided string is a valid http(s) URL
    ///
    /// # Arguments
    /// * `url` - The URL string to validate and wrap
    /// * `force_https` - Rewrite an `http://` target to `https://`
    pub fn new(url: &str, force_https: bool) -> BackendResult<Self> {
        let mut parsed = url::Url::parse(url)
            .map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(BackendError::InvalidUrl(format!(
                    "Backend URL must start with http:// or https://, got scheme '{other}'"
                )));
            }
        }
        if force_https && parsed.scheme() == "http" {
            parsed
                .set_scheme("https")
                .map_err(|_| BackendError::InvalidUrl(format!("{url}: cannot force https")))?;
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| BackendError::InvalidUrl(format!("{url}: missing host")))?;
        let authority_str = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&authority_str)
            .map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        let is_secure = parsed.scheme() == "https";
        let url = parsed.as_str().trim_end_matches('/').to_string();

        Ok(BackendUrl {
            url,
            authority,
            is_secure,
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Value for the outbound `Host` header when the caller's host is not preserved
    pub fn host_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(self.authority.as_str()).ok()
    }

    /// Check if the URL is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }
}

impl FromStr for BackendUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendUrl::new(s, false)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_url_valid() {
        let backend_url = BackendUrl::new("http://localhost:9000", false).unwrap();
        assert_eq!(backend_url.as_str(), "http://localhost:9000");
        assert_eq!(backend_url.authority().as_str(), "localhost:9000");
        assert!(!backend_url.is_secure());

        let secure = BackendUrl::new("https://secure.example.com/base/", false).unwrap();
        assert_eq!(secure.as_str(), "https://secure.example.com/base");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_backend_url_invalid() {
        assert!(BackendUrl::new("example.com", false).is_err());
        assert!(BackendUrl::new("ftp://example.com", false).is_err());
    }

    #[test]
    fn test_force_https() {
        let url = BackendUrl::new("http://api.example.com/v1", true).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1");
        assert!(url.is_secure());

        let url = BackendUrl::new("http://api.example.com:8080", true).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com:8080");
    }

    #[test]
    fn test_backend_url_from_str() {
        let backend_url: BackendUrl = "http://example.com".parse().unwrap();
        assert_eq!(backend_url.as_str(), "http://example.com");
        assert_eq!(
            backend_url.host_header().unwrap(),
            HeaderValue::from_static("example.com")
        );
    }
}
