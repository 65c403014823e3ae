//! Gateway orchestration.
//!
//! [`Gateway`] owns the process-wide lifecycle: it resolves the configuration,
//! builds the registry and proxy composer, registers every API definition it
//! can discover, and only then opens the shared listener.
//!
//! ```text
//! Created -> Initializing -> Ready -> Stopped
//!                 |
//!                 +-> FailedToStart
//! ```
//!
//! A broken API definition is logged and skipped; only an unusable gateway
//! configuration (or a listener that cannot bind) fails the start.
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{DirectoryDefinitionSource, HttpClientAdapter, HttpHandler},
    config::{
        ApiDefinitionValidator, ValidationError, load_resolved_config,
        models::{ApiDefinition, ResolvedGatewayConfig},
    },
    core::{
        filter::FilterRegistry,
        interceptor::InterceptorRegistry,
        policy::PolicyError,
        proxy::ProxyComposer,
        registry::ApiRegistry,
    },
    ports::{
        definition_source::{DefinitionSource, DiscoveredDefinition},
        http_client::HttpClient,
    },
};

/// How long `stop` waits for in-flight requests before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`Gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Created,
    Initializing,
    Ready,
    Stopped,
    FailedToStart,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Invalid gateway configuration {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Invalid API definition '{api}': {source}")]
    InvalidDefinition {
        api: String,
        #[source]
        source: ValidationError,
    },

    #[error("Failed to compile policies of API '{api}': {source}")]
    Policy {
        api: String,
        #[source]
        source: PolicyError,
    },

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize gateway: {0}")]
    Startup(String),

    #[error("Operation not allowed while gateway is {0:?}")]
    InvalidState(GatewayState),
}

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    watcher: Option<JoinHandle<()>>,
    // Owns the directory watch, if any
    _source: Arc<dyn DefinitionSource>,
}

/// Pieces built once during initialization.
struct Core {
    config: Arc<ResolvedGatewayConfig>,
    composer: ProxyComposer,
}

/// The API gateway: configuration, registry and shared HTTP listener.
pub struct Gateway {
    config_file: PathBuf,
    registry: Arc<ApiRegistry>,
    http_client: Option<Arc<dyn HttpClient>>,
    filters: FilterRegistry,
    interceptors: InterceptorRegistry,
    core: OnceLock<Core>,
    state: watch::Sender<GatewayState>,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    /// Create a gateway for the given configuration file. Nothing is read
    /// until [`Gateway::start`].
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            registry: Arc::new(ApiRegistry::new()),
            http_client: None,
            filters: FilterRegistry::new(),
            interceptors: InterceptorRegistry::new(),
            core: OnceLock::new(),
            state: watch::Sender::new(GatewayState::Created),
            running: Mutex::new(None),
        }
    }

    /// Use a custom backend client instead of the default hyper/rustls one.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Use a custom set of filter kinds.
    pub fn with_filter_registry(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    /// Use a custom set of interceptor kinds.
    pub fn with_interceptor_registry(mut self, interceptors: InterceptorRegistry) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn state(&self) -> GatewayState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<GatewayState> {
        self.state.subscribe()
    }

    /// The resolved configuration, once initialization has read it.
    pub fn config(&self) -> Option<Arc<ResolvedGatewayConfig>> {
        self.core.get().map(|core| core.config.clone())
    }

    pub fn registry(&self) -> &Arc<ApiRegistry> {
        &self.registry
    }

    pub fn apis(&self) -> Vec<Arc<ApiDefinition>> {
        self.registry.all()
    }

    pub fn api(&self, key: &str) -> Option<Arc<ApiDefinition>> {
        self.registry.lookup(key)
    }

    /// Address of the shared listener while the gateway is ready.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Validate, compile and install one API definition, replacing any API
    /// registered under the same key. Returns the API key.
    ///
    /// Refused unless the gateway is initializing or ready.
    pub fn register_api(&self, api: ApiDefinition) -> Result<String, GatewayError> {
        let state = self.state();
        if !matches!(state, GatewayState::Initializing | GatewayState::Ready) {
            return Err(GatewayError::InvalidState(state));
        }
        let core = self
            .core
            .get()
            .ok_or(GatewayError::InvalidState(state))?;
        register_definition(&core.composer, &self.registry, api)
    }

    /// Initialize and open the listener. Returns the bound address.
    ///
    /// Calling `start` on a ready gateway returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
        let mut running = self.running.lock().await;
        match self.state() {
            GatewayState::Ready => {
                if let Some(r) = running.as_ref() {
                    return Ok(r.local_addr);
                }
            }
            GatewayState::Created => {}
            other => return Err(GatewayError::InvalidState(other)),
        }

        self.state.send_replace(GatewayState::Initializing);
        match self.initialize().await {
            Ok(started) => {
                let addr = started.local_addr;
                *running = Some(started);
                self.state.send_replace(GatewayState::Ready);
                tracing::info!("Gateway listening on {}", addr);
                Ok(addr)
            }
            Err(e) => {
                tracing::error!("Gateway failed to start: {}", e);
                self.state.send_replace(GatewayState::FailedToStart);
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<Running, GatewayError> {
        let config = load_resolved_config(&self.config_file)
            .await
            .map_err(|e| GatewayError::Config {
                path: self.config_file.clone(),
                message: format!("{e:#}"),
            })?;
        let config = Arc::new(config);
        tracing::debug!(?config, "Resolved gateway configuration");

        let http_client = match &self.http_client {
            Some(client) => client.clone(),
            None => Arc::new(
                HttpClientAdapter::new().map_err(|e| GatewayError::Startup(format!("{e:#}")))?,
            ),
        };
        let composer = ProxyComposer::new(http_client, config.default_timeout, config.under_proxy)
            .with_registries(self.filters.clone(), self.interceptors.clone());

        let core = self.core.get_or_init(|| Core {
            config: config.clone(),
            composer,
        });

        let source: Arc<dyn DefinitionSource> =
            Arc::new(DirectoryDefinitionSource::new(&config.api_path));
        load_apis(&core.composer, &self.registry, source.as_ref()).await;

        let watcher = if config.watch_apis {
            match source.watch() {
                Ok(rx) => Some(tokio::spawn(watch_apis(
                    core.composer.clone(),
                    self.registry.clone(),
                    rx,
                ))),
                Err(e) => {
                    tracing::error!("Failed to watch API directory: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let listener = match TcpListener::bind(config.listen_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                if let Some(w) = &watcher {
                    w.abort();
                }
                return Err(GatewayError::Bind {
                    addr: config.listen_addr,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind {
            addr: config.listen_addr,
            source,
        })?;

        let shutdown = CancellationToken::new();
        let app = HttpHandler::new(self.registry.clone()).router();
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
        });

        Ok(Running {
            local_addr,
            shutdown,
            server,
            watcher,
            _source: source,
        })
    }

    /// Close the listener. A no-op unless the gateway is ready.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(mut r) = running.take() else {
            tracing::debug!("Gateway not running, nothing to stop");
            return;
        };

        tracing::info!("Stopping gateway on {}", r.local_addr);
        if let Some(watcher) = r.watcher.take() {
            watcher.abort();
        }
        r.shutdown.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut r.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => tracing::error!("Server task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "In-flight requests did not finish within {:?}, aborting",
                    SHUTDOWN_GRACE
                );
                r.server.abort();
            }
        }

        self.state.send_replace(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }
}

/// Validate and install one definition.
fn register_definition(
    composer: &ProxyComposer,
    registry: &ApiRegistry,
    api: ApiDefinition,
) -> Result<String, GatewayError> {
    ApiDefinitionValidator::validate(&api).map_err(|source| GatewayError::InvalidDefinition {
        api: api.name.clone(),
        source,
    })?;
    let name = api.name.clone();
    composer
        .install(api, registry)
        .map_err(|source| GatewayError::Policy { api: name, source })
}

/// Handle one discovered definition, logging instead of failing.
fn register_discovered(
    composer: &ProxyComposer,
    registry: &ApiRegistry,
    discovered: DiscoveredDefinition,
) -> bool {
    let origin = discovered.origin.display();
    match discovered
        .definition
        .map_err(|e| format!("{e:#}"))
        .and_then(|api| register_definition(composer, registry, api).map_err(|e| e.to_string()))
    {
        Ok(key) => {
            tracing::debug!("Registered API {} from {}", key, origin);
            true
        }
        Err(e) => {
            tracing::error!("Skipping API definition {}: {}", origin, e);
            false
        }
    }
}

/// Register every discoverable definition before the listener opens.
async fn load_apis(composer: &ProxyComposer, registry: &ApiRegistry, source: &dyn DefinitionSource) {
    let discovered = match source.discover().await {
        Ok(discovered) => discovered,
        Err(e) => {
            tracing::error!("Failed to discover API definitions: {:#}", e);
            return;
        }
    };

    let total = discovered.len();
    let registered = discovered
        .into_iter()
        .map(|d| register_discovered(composer, registry, d))
        .filter(|ok| *ok)
        .count();
    tracing::info!("Registered {} of {} API definitions", registered, total);
}

async fn watch_apis(
    composer: ProxyComposer,
    registry: Arc<ApiRegistry>,
    mut rx: mpsc::Receiver<DiscoveredDefinition>,
) {
    tracing::info!("Watching API directory for changes");
    while let Some(discovered) = rx.recv().await {
        register_discovered(&composer, &registry, discovered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let gateway = Gateway::new("/nonexistent/gateway.json");
        gateway.stop().await;
        assert_eq!(gateway.state(), GatewayState::Created);
    }

    #[tokio::test]
    async fn missing_config_fails_to_start() {
        let gateway = Gateway::new("/nonexistent/gateway.json");
        let err = gateway.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
        assert_eq!(gateway.state(), GatewayState::FailedToStart);

        // Terminal: a second start is refused
        assert!(matches!(
            gateway.start().await,
            Err(GatewayError::InvalidState(GatewayState::FailedToStart))
        ));
    }

    #[test]
    fn register_before_start_is_refused() {
        let gateway = Gateway::new("/nonexistent/gateway.json");
        let api: ApiDefinition = serde_json::from_value(serde_json::json!({
            "name": "orders",
            "proxy": {"path": "/orders", "target": {"path": "http://localhost:9000"}}
        }))
        .unwrap();
        assert!(matches!(
            gateway.register_api(api),
            Err(GatewayError::InvalidState(GatewayState::Created))
        ));
    }
}
