//! Built-in request filters: `methodFilter`, `headerFilter`, `pathFilter`.
//!
//! Every built-in accepts optional `status` and `message` parameters that
//! override its rejection response.

use http::{HeaderName, Method, StatusCode, request::Parts};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{FilterContext, RequestFilter};
use crate::core::policy::{MethodSet, PolicyError, Rejection, parse_params};

/// Apply `status` / `message` overrides on top of a filter's default rejection.
pub(crate) fn rejection_from(
    kind: &str,
    status: Option<u16>,
    message: Option<String>,
    default: Rejection,
) -> Result<Rejection, PolicyError> {
    let mut rejection = default;
    if let Some(code) = status {
        rejection.status = StatusCode::from_u16(code).map_err(|_| PolicyError::InvalidParams {
            kind: kind.to_string(),
            message: format!("{code} is not a valid HTTP status"),
        })?;
    }
    if let Some(message) = message {
        rejection.message = message;
    }
    Ok(rejection)
}

fn compile_regex(kind: &str, pattern: &str) -> Result<Regex, PolicyError> {
    Regex::new(pattern).map_err(|e| PolicyError::InvalidParams {
        kind: kind.to_string(),
        message: format!("invalid regex '{pattern}': {e}"),
    })
}

#[derive(Debug, Deserialize)]
struct MethodFilterParams {
    allow: Vec<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Only lets through the listed HTTP methods (405 otherwise).
pub struct MethodFilter {
    allow: MethodSet,
    rejection: Rejection,
}

impl MethodFilter {
    pub fn build(params: &Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError> {
        let params: MethodFilterParams = parse_params("methodFilter", params)?;
        if params.allow.is_empty() {
            return Err(PolicyError::InvalidParams {
                kind: "methodFilter".to_string(),
                message: "'allow' must list at least one method".to_string(),
            });
        }
        Ok(Box::new(Self {
            allow: MethodSet::parse(&params.allow)?,
            rejection: rejection_from(
                "methodFilter",
                params.status,
                params.message,
                Rejection::new(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
            )?,
        }))
    }

    fn allows(&self, method: &Method) -> bool {
        self.allow.matches(method)
    }
}

impl RequestFilter for MethodFilter {
    fn name(&self) -> &str {
        "methodFilter"
    }

    fn check(&self, req: &Parts, ctx: &mut FilterContext<'_>) -> bool {
        if self.allows(&req.method) {
            return true;
        }
        ctx.reject(self.rejection.clone());
        false
    }
}

#[derive(Debug, Deserialize)]
struct HeaderFilterParams {
    header: String,
    #[serde(default)]
    matches: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Requires a header to be present, optionally with a value matching a regex.
pub struct HeaderFilter {
    header: HeaderName,
    matches: Option<Regex>,
    missing: Rejection,
    mismatch: Rejection,
}

impl HeaderFilter {
    pub fn build(params: &Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError> {
        let params: HeaderFilterParams = parse_params("headerFilter", params)?;
        let header = HeaderName::from_bytes(params.header.as_bytes()).map_err(|e| {
            PolicyError::InvalidParams {
                kind: "headerFilter".to_string(),
                message: format!("invalid header '{}': {e}", params.header),
            }
        })?;
        let matches = params
            .matches
            .as_deref()
            .map(|p| compile_regex("headerFilter", p))
            .transpose()?;

        let missing = rejection_from(
            "headerFilter",
            params.status,
            params.message.clone(),
            Rejection::new(
                StatusCode::BAD_REQUEST,
                format!("Missing required header '{header}'"),
            ),
        )?;
        let mismatch = rejection_from(
            "headerFilter",
            params.status,
            params.message,
            Rejection::new(StatusCode::FORBIDDEN, "Forbidden"),
        )?;

        Ok(Box::new(Self {
            header,
            matches,
            missing,
            mismatch,
        }))
    }
}

impl RequestFilter for HeaderFilter {
    fn name(&self) -> &str {
        "headerFilter"
    }

    fn check(&self, req: &Parts, ctx: &mut FilterContext<'_>) -> bool {
        let Some(value) = req.headers.get(&self.header) else {
            ctx.reject(self.missing.clone());
            return false;
        };
        let Some(pattern) = &self.matches else {
            return true;
        };
        let matched = value.to_str().is_ok_and(|v| pattern.is_match(v));
        if !matched {
            ctx.reject(self.mismatch.clone());
        }
        matched
    }
}

#[derive(Debug, Deserialize)]
struct PathFilterParams {
    deny: Vec<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Rejects requests whose path beyond the public path matches any deny regex.
pub struct PathFilter {
    deny: Vec<Regex>,
    rejection: Rejection,
}

impl PathFilter {
    pub fn build(params: &Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError> {
        let params: PathFilterParams = parse_params("pathFilter", params)?;
        let deny = params
            .deny
            .iter()
            .map(|p| compile_regex("pathFilter", p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(Self {
            deny,
            rejection: rejection_from(
                "pathFilter",
                params.status,
                params.message,
                Rejection::new(StatusCode::NOT_FOUND, "Not Found"),
            )?,
        }))
    }
}

impl RequestFilter for PathFilter {
    fn name(&self) -> &str {
        "pathFilter"
    }

    fn check(&self, _req: &Parts, ctx: &mut FilterContext<'_>) -> bool {
        let suffix = ctx.path_suffix;
        if self.deny.iter().any(|re| re.is_match(suffix)) {
            ctx.reject(self.rejection.clone());
            return false;
        }
        true
    }
}
