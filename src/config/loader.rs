use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{
    models::{ApiDefinition, GatewayConfig, ResolvedGatewayConfig},
    validation::{GatewayConfigValidator, ValidationError, ValidationResult},
};

/// Backend timeout applied when neither the API nor the gateway sets one.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Load the gateway configuration from a file using the config crate
pub async fn load_config(config_path: impl AsRef<Path>) -> Result<GatewayConfig> {
    load_config_sync(config_path.as_ref())
}

/// Load the gateway configuration synchronously
pub fn load_config_sync(config_path: &Path) -> Result<GatewayConfig> {
    // JSON is the native format; other formats are accepted by extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

/// Validate a loaded configuration and resolve it into its immutable runtime form.
///
/// `rootPath` defaults to the config file's directory; relative `rootPath`,
/// `apiPath` and `middlewarePath` values are joined onto their base.
pub fn resolve_config(
    config_file: &Path,
    config: GatewayConfig,
) -> ValidationResult<ResolvedGatewayConfig> {
    GatewayConfigValidator::validate(&config)?;

    let config_file = absolute(config_file);
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let root_path = match config.root_path {
        Some(root) => join_relative(&config_dir, root),
        None => config_dir,
    };
    let api_path = match config.api_path {
        Some(path) => join_relative(&root_path, path),
        None => root_path.join("apis"),
    };
    let middleware_path = match config.middleware_path {
        Some(path) => join_relative(&root_path, path),
        None => root_path.join("middleware"),
    };

    let ip: IpAddr =
        config
            .listen_address
            .parse()
            .map_err(|_| ValidationError::InvalidListenAddress {
                address: config.listen_address.clone(),
                reason: "Must be an IP address".to_string(),
            })?;

    let default_timeout = match &config.default_timeout {
        Some(spec) => spec
            .to_duration()
            .map_err(|message| ValidationError::InvalidField {
                field: "defaultTimeout".to_string(),
                message,
            })?,
        None => DEFAULT_BACKEND_TIMEOUT,
    };

    Ok(ResolvedGatewayConfig {
        config_file,
        root_path,
        api_path,
        middleware_path,
        listen_addr: SocketAddr::new(ip, config.listen_port),
        admin_port: config.admin_port,
        under_proxy: config.under_proxy,
        default_timeout,
        watch_apis: config.watch_apis,
        database: config.database,
        logger: config.logger,
    })
}

impl GatewayConfig {
    /// Validate and resolve relative to the file this configuration came from.
    pub fn resolve(self, config_file: &Path) -> ValidationResult<ResolvedGatewayConfig> {
        resolve_config(config_file, self)
    }
}

/// Load, validate and resolve in one step.
pub async fn load_resolved_config(config_file: impl AsRef<Path>) -> Result<ResolvedGatewayConfig> {
    let config_file = config_file.as_ref();
    let config = load_config(config_file).await?;
    let resolved = resolve_config(config_file, config)
        .with_context(|| format!("Invalid gateway configuration {}", config_file.display()))?;
    Ok(resolved)
}

/// Parse one API definition file.
pub async fn load_api_definition(path: impl AsRef<Path>) -> Result<ApiDefinition> {
    let path = path.as_ref();
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read API definition {}", path.display()))?;
    let api = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse API definition {}", path.display()))?;
    Ok(api)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn join_relative(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
