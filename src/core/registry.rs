//! The live API registry.
//!
//! Definitions and their route handlers live in one immutable
//! [`RegistrySnapshot`] behind an [`ArcSwap`]. Readers load the current
//! snapshot without locking; every registration builds a new snapshot and
//! swaps it in with a single compare-and-swap, so registry membership and
//! routing can never diverge and no request observes a half-applied update.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::{config::models::ApiDefinition, core::proxy::ComposedProxyHandler, utils::match_suffix};

/// One immutable generation of the registry.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    apis: HashMap<String, Arc<ApiDefinition>>,
    /// Sorted by descending public path length for longest-prefix matching
    routes: Vec<Arc<ComposedProxyHandler>>,
}

impl RegistrySnapshot {
    pub fn get(&self, key: &str) -> Option<&Arc<ApiDefinition>> {
        self.apis.get(key)
    }

    pub fn apis(&self) -> impl Iterator<Item = &Arc<ApiDefinition>> {
        self.apis.values()
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Find the handler whose public path is the longest prefix of `path`.
    pub fn route(&self, path: &str) -> Option<&Arc<ComposedProxyHandler>> {
        self.routes
            .iter()
            .find(|handler| match_suffix(handler.public_path(), path).is_some())
    }
}

/// Authoritative mapping from API key to definition, plus the route table.
#[derive(Debug, Default)]
pub struct ApiRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `definition` under its key together with its handler.
    ///
    /// Last write wins: an entry with the same key is replaced wholesale. An
    /// entry under a different key that owns the same public path is evicted,
    /// since one path can only route to one handler.
    pub fn register(&self, definition: ApiDefinition, handler: ComposedProxyHandler) -> String {
        let key = definition.api_key();
        let definition = Arc::new(definition);
        let handler = Arc::new(handler);

        let previous = self.snapshot.rcu(|current| {
            let mut apis = current.apis.clone();
            let mut routes: Vec<_> = current
                .routes
                .iter()
                .filter(|r| r.api_key() != key && r.public_path() != handler.public_path())
                .cloned()
                .collect();

            apis.retain(|k, api| *k == key || api.proxy.path != handler.public_path());
            apis.insert(key.clone(), definition.clone());
            routes.push(handler.clone());
            routes.sort_by(|a, b| b.public_path().len().cmp(&a.public_path().len()));

            RegistrySnapshot { apis, routes }
        });

        for displaced in previous
            .routes
            .iter()
            .filter(|r| r.api_key() != key && r.public_path() == handler.public_path())
        {
            tracing::warn!(
                displaced = %displaced.api_key(),
                by = %key,
                path = %handler.public_path(),
                "Public path taken over by another API"
            );
        }
        key
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<ApiDefinition>> {
        self.snapshot.load().get(key).cloned()
    }

    /// All registered definitions, taken from one consistent snapshot.
    pub fn all(&self) -> Vec<Arc<ApiDefinition>> {
        self.snapshot.load().apis().cloned().collect()
    }

    /// The current snapshot, for callers that need several consistent reads.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn route(&self, path: &str) -> Option<Arc<ComposedProxyHandler>> {
        self.snapshot.load().route(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}
