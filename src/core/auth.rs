//! Per-API authentication.
//!
//! [`ApiAuth::configure`] compiles an API's `authentication` block into an
//! [`Authenticator`] that is embedded in the API's proxy handler and checked
//! after rate limiting, before the filter chain.
use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use http::{HeaderName, HeaderValue, StatusCode, header, request::Parts};

use crate::{
    config::models::AuthenticationConfig,
    core::policy::{PolicyError, Rejection},
};

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// A compiled authentication strategy.
#[derive(Debug)]
pub enum Authenticator {
    Basic {
        users: HashMap<String, String>,
        challenge: HeaderValue,
    },
    ApiKey {
        keys: Vec<String>,
        header: HeaderName,
        query_param: Option<String>,
    },
}

impl Authenticator {
    pub fn new(config: &AuthenticationConfig) -> Result<Self, PolicyError> {
        match config {
            AuthenticationConfig::Basic { users, realm } => {
                if users.is_empty() {
                    return Err(PolicyError::Authentication(
                        "basic strategy needs at least one user".to_string(),
                    ));
                }
                let realm = realm.as_deref().unwrap_or("canopy");
                let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
                    .map_err(|e| PolicyError::Authentication(format!("invalid realm: {e}")))?;
                Ok(Authenticator::Basic {
                    users: users.clone(),
                    challenge,
                })
            }
            AuthenticationConfig::ApiKey {
                keys,
                header,
                query_param,
            } => {
                if keys.is_empty() {
                    return Err(PolicyError::Authentication(
                        "apiKey strategy needs at least one key".to_string(),
                    ));
                }
                let header_str = header.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER);
                let header = HeaderName::from_bytes(header_str.as_bytes()).map_err(|e| {
                    PolicyError::Authentication(format!("invalid header '{header_str}': {e}"))
                })?;
                Ok(Authenticator::ApiKey {
                    keys: keys.clone(),
                    header,
                    query_param: query_param.clone(),
                })
            }
        }
    }

    /// Check the request's credentials.
    pub fn authenticate(&self, req: &Parts) -> Result<(), Rejection> {
        match self {
            Authenticator::Basic { users, challenge } => {
                let authorized = basic_credentials(req)
                    .is_some_and(|(user, password)| users.get(&user) == Some(&password));
                if authorized {
                    Ok(())
                } else {
                    Err(Rejection::new(StatusCode::UNAUTHORIZED, "Unauthorized")
                        .with_header(header::WWW_AUTHENTICATE, challenge.clone()))
                }
            }
            Authenticator::ApiKey {
                keys,
                header,
                query_param,
            } => {
                let from_header = req.headers.get(header).and_then(|v| v.to_str().ok());
                let from_query = query_param
                    .as_deref()
                    .and_then(|name| query_value(req, name));
                let presented = from_header.map(str::to_string).or(from_query);
                match presented {
                    Some(key) if keys.iter().any(|k| *k == key) => Ok(()),
                    _ => Err(Rejection::new(StatusCode::UNAUTHORIZED, "Unauthorized")),
                }
            }
        }
    }
}

fn basic_credentials(req: &Parts) -> Option<(String, String)> {
    let value = req.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn query_value(req: &Parts, name: &str) -> Option<String> {
    let query = req.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Authentication subsystem entry point.
pub struct ApiAuth;

impl ApiAuth {
    /// Compile the authentication policy of API `api_key` mounted on
    /// `public_path`. Invoked once per registration.
    pub fn configure(
        api_key: &str,
        public_path: &str,
        authentication: &AuthenticationConfig,
    ) -> Result<Authenticator, PolicyError> {
        tracing::debug!(api = %api_key, path = %public_path, "Configuring authentication");
        Authenticator::new(authentication)
    }
}
