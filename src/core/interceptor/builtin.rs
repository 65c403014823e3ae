//! Built-in interceptor kinds.
//!
//! | kind           | request | response | params               |
//! |----------------|---------|----------|----------------------|
//! | `addHeader`    | yes     | yes      | `header`, `value`    |
//! | `removeHeader` | yes     | yes      | `header`             |
//! | `setBody`      | yes     | yes      | `text` or `json`     |
//! | `setStatus`    | no      | yes      | `status`             |

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{RequestInterceptor, ResponseInterceptor};
use crate::core::policy::{PolicyError, parse_params};

fn invalid(kind: &str, message: impl Into<String>) -> PolicyError {
    PolicyError::InvalidParams {
        kind: kind.to_string(),
        message: message.into(),
    }
}

fn header_name(kind: &str, name: &str) -> Result<HeaderName, PolicyError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| invalid(kind, format!("invalid header '{name}': {e}")))
}

#[derive(Debug, Deserialize)]
struct AddHeaderParams {
    header: String,
    value: String,
}

/// Sets a header, replacing any existing values.
pub struct AddHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl AddHeader {
    fn from_params(params: &Map<String, Value>) -> Result<Self, PolicyError> {
        let params: AddHeaderParams = parse_params("addHeader", params)?;
        let value = HeaderValue::from_str(&params.value)
            .map_err(|e| invalid("addHeader", format!("invalid value: {e}")))?;
        Ok(Self {
            name: header_name("addHeader", &params.header)?,
            value,
        })
    }

    pub fn build_request(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn RequestInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    pub fn build_response(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn ResponseInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(self.name.clone(), self.value.clone());
    }
}

impl RequestInterceptor for AddHeader {
    fn name(&self) -> &str {
        "addHeader"
    }

    fn intercept(&self, req: &mut Request<AxumBody>) {
        self.apply(req.headers_mut());
    }
}

impl ResponseInterceptor for AddHeader {
    fn name(&self) -> &str {
        "addHeader"
    }

    fn intercept(&self, res: &mut Response<AxumBody>) {
        self.apply(res.headers_mut());
    }
}

#[derive(Debug, Deserialize)]
struct RemoveHeaderParams {
    header: String,
}

pub struct RemoveHeader {
    name: HeaderName,
}

impl RemoveHeader {
    fn from_params(params: &Map<String, Value>) -> Result<Self, PolicyError> {
        let params: RemoveHeaderParams = parse_params("removeHeader", params)?;
        Ok(Self {
            name: header_name("removeHeader", &params.header)?,
        })
    }

    pub fn build_request(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn RequestInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    pub fn build_response(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn ResponseInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }
}

impl RequestInterceptor for RemoveHeader {
    fn name(&self) -> &str {
        "removeHeader"
    }

    fn intercept(&self, req: &mut Request<AxumBody>) {
        req.headers_mut().remove(&self.name);
    }
}

impl ResponseInterceptor for RemoveHeader {
    fn name(&self) -> &str {
        "removeHeader"
    }

    fn intercept(&self, res: &mut Response<AxumBody>) {
        res.headers_mut().remove(&self.name);
    }
}

#[derive(Debug, Deserialize)]
struct SetBodyParams {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    json: Option<Value>,
}

/// Replaces the body with a fixed payload.
pub struct SetBody {
    body: Bytes,
    content_type: HeaderValue,
}

impl SetBody {
    fn from_params(params: &Map<String, Value>) -> Result<Self, PolicyError> {
        let params: SetBodyParams = parse_params("setBody", params)?;
        match (params.text, params.json) {
            (Some(text), None) => Ok(Self {
                body: Bytes::from(text),
                content_type: HeaderValue::from_static("text/plain; charset=utf-8"),
            }),
            (None, Some(json)) => {
                let body = serde_json::to_vec(&json)
                    .map_err(|e| invalid("setBody", e.to_string()))?;
                Ok(Self {
                    body: Bytes::from(body),
                    content_type: HeaderValue::from_static("application/json"),
                })
            }
            _ => Err(invalid("setBody", "exactly one of 'text' or 'json' is required")),
        }
    }

    pub fn build_request(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn RequestInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    pub fn build_response(
        params: &Map<String, Value>,
    ) -> Result<Box<dyn ResponseInterceptor>, PolicyError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    fn apply(&self, headers: &mut HeaderMap, body: &mut AxumBody) {
        *body = AxumBody::from(self.body.clone());
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONTENT_ENCODING);
        headers.insert(header::CONTENT_TYPE, self.content_type.clone());
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }
}

impl RequestInterceptor for SetBody {
    fn name(&self) -> &str {
        "setBody"
    }

    fn intercept(&self, req: &mut Request<AxumBody>) {
        let mut body = std::mem::replace(req.body_mut(), AxumBody::empty());
        self.apply(req.headers_mut(), &mut body);
        *req.body_mut() = body;
    }
}

impl ResponseInterceptor for SetBody {
    fn name(&self) -> &str {
        "setBody"
    }

    fn intercept(&self, res: &mut Response<AxumBody>) {
        let mut body = std::mem::replace(res.body_mut(), AxumBody::empty());
        self.apply(res.headers_mut(), &mut body);
        *res.body_mut() = body;
    }
}

#[derive(Debug, Deserialize)]
struct SetStatusParams {
    status: u16,
}

/// Overrides the response status code.
pub struct SetStatus {
    status: StatusCode,
}

impl SetStatus {
    pub fn build(params: &Map<String, Value>) -> Result<Box<dyn ResponseInterceptor>, PolicyError> {
        let params: SetStatusParams = parse_params("setStatus", params)?;
        let status = StatusCode::from_u16(params.status).map_err(|_| {
            invalid(
                "setStatus",
                format!("{} is not a valid HTTP status", params.status),
            )
        })?;
        Ok(Box::new(Self { status }))
    }
}

impl ResponseInterceptor for SetStatus {
    fn name(&self) -> &str {
        "setStatus"
    }

    fn intercept(&self, res: &mut Response<AxumBody>) {
        *res.status_mut() = self.status;
    }
}
