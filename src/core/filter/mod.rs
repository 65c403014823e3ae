//! Filter chain builder.
//!
//! A filter spec (`{"name": "ipFilter", "appliesTo": [...], ...}`) is compiled
//! once, at registration time, into a [`RequestFilter`] by looking its `name`
//! up in a [`FilterRegistry`]. The resulting [`FilterChain`] is evaluated per
//! request as a short-circuiting logical AND in declared order: the first
//! filter returning `false` stops evaluation and the request is rejected.
//! An empty chain always passes.
//!
//! Unknown kinds fail the build with [`PolicyError::UnknownFilter`], so a
//! misspelled filter can never silently let every request through.
pub mod builtin;
pub mod ip_filter;

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use http::request::Parts;
use serde_json::{Map, Value};

use crate::{
    config::FilterSpec,
    core::policy::{MethodSet, PolicyError, Rejection},
};

/// Per-request state handed to every filter: derived request facts plus the
/// slot where a filter records the response it wants on rejection.
#[derive(Debug)]
pub struct FilterContext<'a> {
    /// Resolved caller address (see [`crate::core::policy::client_ip`])
    pub client_ip: Option<IpAddr>,
    /// Request path beyond the API's public path, leading slash included
    pub path_suffix: &'a str,
    rejection: Option<Rejection>,
}

impl<'a> FilterContext<'a> {
    pub fn new(client_ip: Option<IpAddr>, path_suffix: &'a str) -> Self {
        Self {
            client_ip,
            path_suffix,
            rejection: None,
        }
    }

    /// Record the response to send if this filter returns `false`.
    pub fn reject(&mut self, rejection: Rejection) {
        self.rejection = Some(rejection);
    }

    fn take_rejection(&mut self) -> Rejection {
        self.rejection.take().unwrap_or_else(Rejection::forbidden)
    }
}

/// A compiled boolean predicate over an inbound request.
pub trait RequestFilter: Send + Sync {
    /// Kind name, for logging
    fn name(&self) -> &str;

    /// Return `true` to let the request continue down the chain.
    fn check(&self, req: &Parts, ctx: &mut FilterContext<'_>) -> bool;
}

/// Constructor turning a spec's parameters into a filter.
pub type FilterConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError> + Send + Sync>;

struct ChainEntry {
    applies_to: MethodSet,
    filter: Box<dyn RequestFilter>,
}

/// Outcome of running a filter chain.
#[derive(Debug)]
pub enum FilterOutcome {
    Pass,
    Reject(Rejection),
}

/// An ordered, immutable sequence of compiled filters.
#[derive(Default)]
pub struct FilterChain {
    entries: Vec<ChainEntry>,
}

impl FilterChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Names of the compiled filters in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.filter.name()).collect()
    }

    /// Evaluate filters in order, stopping at the first one that says no.
    /// Filters scoped to other methods are skipped and count as a pass.
    pub fn evaluate(&self, req: &Parts, ctx: &mut FilterContext<'_>) -> FilterOutcome {
        for entry in &self.entries {
            if !entry.applies_to.matches(&req.method) {
                continue;
            }
            if !entry.filter.check(req, ctx) {
                tracing::debug!(filter = entry.filter.name(), "Request rejected by filter");
                return FilterOutcome::Reject(ctx.take_rejection());
            }
        }
        FilterOutcome::Pass
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Lookup table from filter kind to constructor.
#[derive(Clone)]
pub struct FilterRegistry {
    constructors: HashMap<String, FilterConstructor>,
}

impl FilterRegistry {
    /// A registry with no kinds at all.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in kinds
    /// (`ipFilter`, `methodFilter`, `headerFilter`, `pathFilter`).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("ipFilter", ip_filter::build);
        registry.register("methodFilter", builtin::MethodFilter::build);
        registry.register("headerFilter", builtin::HeaderFilter::build);
        registry.register("pathFilter", builtin::PathFilter::build);
        registry
    }

    /// Add or replace the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn RequestFilter>, PolicyError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Compile a single spec.
    pub fn build(&self, spec: &FilterSpec) -> Result<Box<dyn RequestFilter>, PolicyError> {
        let constructor = self
            .constructors
            .get(&spec.name)
            .ok_or_else(|| PolicyError::UnknownFilter(spec.name.clone()))?;
        constructor(&spec.params)
    }

    /// Compile an ordered list of specs into a chain. Fails on the first
    /// unknown or misconfigured filter.
    pub fn build_chain(&self, specs: &[FilterSpec]) -> Result<FilterChain, PolicyError> {
        let entries = specs
            .iter()
            .map(|spec| {
                Ok(ChainEntry {
                    applies_to: MethodSet::parse(&spec.applies_to)?,
                    filter: self.build(spec)?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(FilterChain { entries })
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
