//! Interceptor pipeline.
//!
//! Request-side and response-side interceptor specs are compiled
//! independently. Each side collapses into at most one function: a
//! [`RequestDecorator`] applied to the outbound request, and a
//! [`ResponseTransformer`] applied to the backend response. Stages run in
//! declared order, each one seeing the previous stage's output. An empty list
//! compiles to `None`, which the proxy treats as identity.
pub mod builtin;

use std::{collections::HashMap, sync::Arc};

use axum::body::Body as AxumBody;
use http::{Method, Request, Response};
use serde_json::{Map, Value};

use crate::{
    config::{InterceptorConfig, InterceptorSpec},
    core::policy::{MethodSet, PolicyError},
};

/// A compiled transform over the outbound request.
pub trait RequestInterceptor: Send + Sync {
    fn name(&self) -> &str;
    fn intercept(&self, req: &mut Request<AxumBody>);
}

/// A compiled transform over the backend response.
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &str;
    fn intercept(&self, res: &mut Response<AxumBody>);
}

pub type RequestInterceptorConstructor = Arc<
    dyn Fn(&Map<String, Value>) -> Result<Box<dyn RequestInterceptor>, PolicyError> + Send + Sync,
>;
pub type ResponseInterceptorConstructor = Arc<
    dyn Fn(&Map<String, Value>) -> Result<Box<dyn ResponseInterceptor>, PolicyError> + Send + Sync,
>;

struct Stage<T: ?Sized> {
    applies_to: MethodSet,
    interceptor: Box<T>,
}

/// All request-side stages of one API, composed into a single function.
pub struct RequestDecorator {
    stages: Vec<Stage<dyn RequestInterceptor>>,
}

impl RequestDecorator {
    pub fn apply(&self, req: &mut Request<AxumBody>) {
        let method = req.method().clone();
        for stage in &self.stages {
            if stage.applies_to.matches(&method) {
                stage.interceptor.intercept(req);
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.interceptor.name()).collect()
    }
}

/// All response-side stages of one API, composed into a single function.
///
/// `appliesTo` is matched against the method of the inbound request.
pub struct ResponseTransformer {
    stages: Vec<Stage<dyn ResponseInterceptor>>,
}

impl ResponseTransformer {
    pub fn apply(&self, method: &Method, res: &mut Response<AxumBody>) {
        for stage in &self.stages {
            if stage.applies_to.matches(method) {
                stage.interceptor.intercept(res);
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.interceptor.name()).collect()
    }
}

impl std::fmt::Debug for RequestDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl std::fmt::Debug for ResponseTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Output of compiling an API's interceptor block.
#[derive(Debug, Default)]
pub struct CompiledInterceptors {
    pub request: Option<RequestDecorator>,
    pub response: Option<ResponseTransformer>,
}

/// Lookup tables from interceptor kind to constructor, one per side.
#[derive(Clone)]
pub struct InterceptorRegistry {
    request: HashMap<String, RequestInterceptorConstructor>,
    response: HashMap<String, ResponseInterceptorConstructor>,
}

impl InterceptorRegistry {
    pub fn empty() -> Self {
        Self {
            request: HashMap::new(),
            response: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_request("addHeader", builtin::AddHeader::build_request);
        registry.register_request("removeHeader", builtin::RemoveHeader::build_request);
        registry.register_request("setBody", builtin::SetBody::build_request);
        registry.register_response("addHeader", builtin::AddHeader::build_response);
        registry.register_response("removeHeader", builtin::RemoveHeader::build_response);
        registry.register_response("setBody", builtin::SetBody::build_response);
        registry.register_response("setStatus", builtin::SetStatus::build);
        registry
    }

    pub fn register_request<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn RequestInterceptor>, PolicyError>
            + Send
            + Sync
            + 'static,
    {
        self.request.insert(kind.into(), Arc::new(constructor));
    }

    pub fn register_response<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn ResponseInterceptor>, PolicyError>
            + Send
            + Sync
            + 'static,
    {
        self.response.insert(kind.into(), Arc::new(constructor));
    }

    pub fn build_request(
        &self,
        specs: &[InterceptorSpec],
    ) -> Result<Option<RequestDecorator>, PolicyError> {
        if specs.is_empty() {
            return Ok(None);
        }
        let stages = specs
            .iter()
            .map(|spec| {
                let constructor = self.request.get(&spec.name).ok_or_else(|| {
                    PolicyError::UnknownInterceptor {
                        side: "request",
                        kind: spec.name.clone(),
                    }
                })?;
                Ok(Stage {
                    applies_to: MethodSet::parse(&spec.applies_to)?,
                    interceptor: constructor(&spec.params)?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Some(RequestDecorator { stages }))
    }

    pub fn build_response(
        &self,
        specs: &[InterceptorSpec],
    ) -> Result<Option<ResponseTransformer>, PolicyError> {
        if specs.is_empty() {
            return Ok(None);
        }
        let stages = specs
            .iter()
            .map(|spec| {
                let constructor = self.response.get(&spec.name).ok_or_else(|| {
                    PolicyError::UnknownInterceptor {
                        side: "response",
                        kind: spec.name.clone(),
                    }
                })?;
                Ok(Stage {
                    applies_to: MethodSet::parse(&spec.applies_to)?,
                    interceptor: constructor(&spec.params)?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Some(ResponseTransformer { stages }))
    }

    /// Compile both sides of an interceptor block.
    pub fn build(&self, config: &InterceptorConfig) -> Result<CompiledInterceptors, PolicyError> {
        Ok(CompiledInterceptors {
            request: self.build_request(&config.request)?,
            response: self.build_response(&config.response)?,
        })
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, StatusCode};

    use super::*;

    struct Append(&'static str);

    impl RequestInterceptor for Append {
        fn name(&self) -> &str {
            self.0
        }

        fn intercept(&self, req: &mut Request<AxumBody>) {
            let current = req
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let next = format!("{current}{}", self.0);
            req.headers_mut()
                .insert("x-trail", HeaderValue::from_str(&next).unwrap());
        }
    }

    fn request(method: Method) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri("/")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[test]
    fn empty_lists_compile_to_none() {
        let compiled = InterceptorRegistry::new()
            .build(&InterceptorConfig::default())
            .unwrap();
        assert!(compiled.request.is_none());
        assert!(compiled.response.is_none());
    }

    #[test]
    fn request_stages_run_in_declared_order() {
        let mut registry = InterceptorRegistry::empty();
        registry.register_request("a", |_| Ok(Box::new(Append("a")) as Box<dyn RequestInterceptor>));
        registry.register_request("b", |_| Ok(Box::new(Append("b")) as Box<dyn RequestInterceptor>));

        let decorator = registry
            .build_request(&[
                InterceptorSpec::new("b"),
                InterceptorSpec::new("a"),
                InterceptorSpec::new("b"),
            ])
            .unwrap()
            .unwrap();

        let mut req = request(Method::GET);
        decorator.apply(&mut req);
        assert_eq!(req.headers()["x-trail"], "bab");
    }

    #[test]
    fn unknown_kind_names_its_side() {
        let registry = InterceptorRegistry::new();
        let err = registry
            .build_response(&[InterceptorSpec::new("rewriteUrl")])
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnknownInterceptor { side: "response", ref kind } if kind == "rewriteUrl"
        ));

        // setStatus only exists on the response side
        let err = registry
            .build_request(&[InterceptorSpec::new("setStatus").param("status", 201)])
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownInterceptor { side: "request", .. }));
    }

    #[test]
    fn applies_to_limits_response_stages() {
        let transformer = InterceptorRegistry::new()
            .build_response(&[InterceptorSpec::new("setStatus")
                .param("status", 202)
                .applies_to(["POST"])])
            .unwrap()
            .unwrap();

        let mut res = Response::new(AxumBody::empty());
        transformer.apply(&Method::GET, &mut res);
        assert_eq!(res.status(), StatusCode::OK);

        transformer.apply(&Method::POST, &mut res);
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
}
