use std::{path::Path, sync::Arc};

use canopy::{
    Gateway, HttpClientAdapter,
    adapters::DirectoryDefinitionSource,
    config::{ApiDefinitionValidator, load_resolved_config},
    core::proxy::ProxyComposer,
    ports::definition_source::DefinitionSource,
    tracing_setup,
    utils::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{Result, eyre::Context};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.json")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the gateway configuration and every API definition
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "gateway.json")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "gateway.json")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_command(&config).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn serve_command(config_path: &str) -> Result<()> {
    // Logging depends on the config, so a broken one can only go to stderr
    let config = match load_resolved_config(config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration '{config_path}':");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };
    tracing_setup::init_tracing(&config.logger).context("Failed to initialize tracing")?;

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let gateway = Gateway::new(config_path);
    let addr = gateway
        .start()
        .await
        .with_context(|| format!("Failed to start gateway from {config_path}"))?;
    tracing::info!(
        "Gateway ready on {} with {} APIs",
        addr,
        gateway.registry().len()
    );

    let reason = shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received: {:?}", reason);

    gateway.stop().await;
    Ok(())
}

async fn validate_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_resolved_config(config_path).await {
        Ok(config) => {
            println!("✅ Gateway configuration: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Gateway configuration invalid:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    // Compiling policies needs a client, but nothing is sent
    let http_client = Arc::new(HttpClientAdapter::new()?);
    let composer = ProxyComposer::new(http_client, config.default_timeout, config.under_proxy);

    let source = DirectoryDefinitionSource::new(&config.api_path);
    let discovered = source.discover().await?;

    let mut failures = 0usize;
    for item in &discovered {
        let origin = item.origin.display();
        let outcome = match &item.definition {
            Err(e) => Err(format!("{e:#}")),
            Ok(api) => ApiDefinitionValidator::validate(api)
                .map_err(|e| e.to_string())
                .and_then(|()| composer.compose(api).map_err(|e| e.to_string()))
                .map(|handler| format!("{} -> {}", handler.public_path(), handler.target())),
        };
        match outcome {
            Ok(route) => println!("   ✅ {origin}: {route}"),
            Err(e) => {
                failures += 1;
                eprintln!("   ❌ {origin}: {e}");
            }
        }
    }

    println!();
    println!("📋 Configuration Summary:");
    println!("   • Listen Address: {}", config.listen_addr);
    println!("   • API Directory: {}", config.api_path.display());
    println!("   • API Definitions: {}", discovered.len());
    println!("   • Default Timeout: {:?}", config.default_timeout);
    println!("   • Watch APIs: {}", config.watch_apis);
    println!();

    if failures > 0 {
        eprintln!("❌ {failures} API definition(s) failed validation");
        std::process::exit(1);
    }
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}
