use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::{LogFormat, LoggerConfig};

/// Install the process-wide subscriber described by the gateway's `logger` section.
///
/// `RUST_LOG`, when set, overrides the configured level.
pub fn init_tracing(logger: &LoggerConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logger.level)
            .wrap_err_with(|| format!("Invalid log level: {}", logger.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = Registry::default().with(env_filter);
    let installed = match logger.format {
        LogFormat::Json => registry
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt_layer.pretty().with_ansi(true)).try_init(),
    };
    installed.wrap_err("A global tracing subscriber is already installed")?;

    tracing::info!(
        "Logging initialized with level: {}, format: {:?}",
        logger.level,
        logger.format
    );
    Ok(())
}
