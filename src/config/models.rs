//! Configuration data structures for Canopy.
//!
//! Two documents are modelled here: the top-level gateway configuration
//! (`GatewayConfig`, loaded once at startup) and the per-API definition
//! (`ApiDefinition`, one JSON file per API under `apiPath`). Both use
//! camelCase keys and serde defaults so minimal files stay concise.
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

/// Top-level gateway configuration as written on disk.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port of the shared API listener (0 picks an ephemeral port)
    pub listen_port: u16,
    /// Port of the administrative API (not served by this crate)
    pub admin_port: u16,
    /// Interface the API listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Base directory for relative paths, defaults to the config file's directory
    #[serde(default)]
    pub root_path: Option<PathBuf>,
    /// Directory holding API definition files
    #[serde(default)]
    pub api_path: Option<PathBuf>,
    /// Directory holding policy modules
    #[serde(default)]
    pub middleware_path: Option<PathBuf>,
    /// Storage connection settings (consumed by the storage backend)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Trust `X-Forwarded-*` headers set by an upstream proxy
    #[serde(default)]
    pub under_proxy: bool,
    /// Backend timeout for APIs that declare none
    #[serde(default)]
    pub default_timeout: Option<DurationSpec>,
    /// Re-register API definitions when files in `apiPath` change
    #[serde(default)]
    pub watch_apis: bool,
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: 8000,
            admin_port: 8001,
            listen_address: default_listen_address(),
            root_path: None,
            api_path: None,
            middleware_path: None,
            database: None,
            under_proxy: false,
            default_timeout: None,
            watch_apis: false,
            logger: LoggerConfig::default(),
        }
    }
}

/// Storage connection settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: Option<u32>,
}

fn default_database_port() -> u16 {
    6379
}

/// Output format for the process-wide log subscriber.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggerConfig {
    /// `EnvFilter` directive, e.g. `info` or `canopy=debug,tower_http=info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// A duration written either as integer milliseconds or a humantime string (`"5s"`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationSpec {
    Millis(u64),
    Text(String),
}

impl DurationSpec {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            DurationSpec::Millis(ms) => Ok(Duration::from_millis(*ms)),
            DurationSpec::Text(text) => humantime::parse_duration(text)
                .map_err(|e| format!("Invalid duration '{text}': {e}")),
        }
    }
}

impl From<Duration> for DurationSpec {
    fn from(duration: Duration) -> Self {
        DurationSpec::Millis(duration.as_millis() as u64)
    }
}

/// Fully resolved, immutable gateway configuration.
///
/// Produced once by [`crate::config::loader::resolve_config`]; every path is
/// absolute and every default has been applied.
#[derive(Debug, Clone)]
pub struct ResolvedGatewayConfig {
    pub config_file: PathBuf,
    pub root_path: PathBuf,
    pub api_path: PathBuf,
    pub middleware_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub admin_port: u16,
    pub under_proxy: bool,
    pub default_timeout: Duration,
    pub watch_apis: bool,
    pub database: Option<DatabaseConfig>,
    pub logger: LoggerConfig,
}

/// Declarative description of one routable API.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub throttling: Option<ThrottlingConfig>,
    #[serde(default)]
    pub authentication: Option<AuthenticationConfig>,
}

impl ApiDefinition {
    /// Registry identity: `name_version`, or `name_default` when unversioned.
    pub fn api_key(&self) -> String {
        format!(
            "{}_{}",
            self.name,
            self.version.as_deref().unwrap_or("default")
        )
    }
}

/// Forwarding parameters and policy stages for one API.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Public path the API is mounted on
    pub path: String,
    pub target: TargetConfig,
    #[serde(default, alias = "preserveHostHdr")]
    pub preserve_host_header: bool,
    #[serde(default)]
    pub timeout: Option<DurationSpec>,
    /// Force the `https` scheme towards the target
    #[serde(default)]
    pub https: bool,
    /// Ordered filter chain
    #[serde(default)]
    pub filter: Vec<FilterSpec>,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetConfig {
    /// Backend base address (`http://host:port/base`)
    pub path: String,
}

/// A named policy stage plus its free-form parameters.
///
/// The `name` selects a constructor from the filter or interceptor registry;
/// every other key is handed to that constructor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub name: String,
    /// Restrict the stage to these HTTP methods (empty means all)
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applies_to: Vec::new(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn applies_to<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applies_to = methods.into_iter().map(Into::into).collect();
        self
    }
}

pub type FilterSpec = PolicySpec;
pub type InterceptorSpec = PolicySpec;

/// Request- and response-side interceptor lists, each applied in declared order.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct InterceptorConfig {
    #[serde(default)]
    pub request: Vec<InterceptorSpec>,
    #[serde(default)]
    pub response: Vec<InterceptorSpec>,
}

/// How throttled requests are grouped into buckets.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleKey {
    #[default]
    Route,
    Ip,
    Header,
}

fn default_time_window() -> String {
    "1m".to_string()
}

fn default_throttle_status() -> u16 {
    429
}

fn default_throttle_message() -> String {
    "Too many requests, please try again later.".to_string()
}

/// Per-API rate limit policy: at most `max` requests per `timeWindow`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThrottlingConfig {
    pub max: u64,
    #[serde(default = "default_time_window")]
    pub time_window: String,
    #[serde(default)]
    pub by: ThrottleKey,
    #[serde(default)]
    pub header_name: Option<String>,
    #[serde(default = "default_throttle_status")]
    pub status_code: u16,
    #[serde(default = "default_throttle_message")]
    pub message: String,
}

/// Per-API authentication policy.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(
    tag = "strategy",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AuthenticationConfig {
    /// HTTP Basic credentials checked against a static user table
    Basic {
        users: HashMap<String, String>,
        #[serde(default)]
        realm: Option<String>,
    },
    /// Static API keys presented in a header or query parameter
    ApiKey {
        keys: Vec<String>,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        query_param: Option<String>,
    },
}
