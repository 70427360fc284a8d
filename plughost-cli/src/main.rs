//! plughost CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plughost_config::{load_config, Config, LogFormat};
use plughost_runtime::{PluginHost, PluginSource};
use plughost_server::{ServerBuilder, SignalHandler};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "plughost")]
#[command(about = "Serve HTTP endpoints from isolated plugin modules", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "plughost.yaml", env = "PLUGHOST_CONFIG")]
        config: PathBuf,

        /// Log level or filter directive, overriding the configured one
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "plughost.yaml", env = "PLUGHOST_CONFIG")]
        config: PathBuf,
    },

    /// Load every configured route once, print its declared route and unload outcome
    Inspect {
        /// Path to configuration file
        #[arg(short, long, default_value = "plughost.yaml", env = "PLUGHOST_CONFIG")]
        config: PathBuf,

        /// Print one JSON document per route
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            let path = config;
            let config = load_config(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;

            let level = log_level.unwrap_or_else(|| config.observability.logging.level.clone());
            init_tracing(&level, config.observability.logging.format)?;

            tracing::info!(config = %path.display(), "Starting plughost");
            tracing::info!(
                listen = %config.server.listen,
                routes = config.routes.len(),
                max_attempts = config.plugins.verify.max_attempts,
                "Configuration loaded"
            );

            let server = ServerBuilder::new().config(config).build()?;

            let shutdown_signal = server.shutdown_signal();
            tokio::spawn(async move {
                SignalHandler::new(shutdown_signal).run().await;
            });

            server.run().await?;
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.server.listen);
                    tracing::info!("  Routes: {}", cfg.routes.len());
                    for route in &cfg.routes {
                        tracing::info!(
                            "    {}: {} ({})",
                            route.name,
                            route.entry_type,
                            route.module_path
                        );
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Inspect { config, json } => {
            let config = load_config(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            init_tracing("warn", config.observability.logging.format)?;

            inspect(&config, json).await
        }

        Commands::Version => {
            println!("plughost");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Plugin API: {}", plughost_plugin_api::API_VERSION);
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn inspect(config: &Config, json: bool) -> Result<()> {
    let mut host = PluginHost::builder().max_attempts(config.plugins.verify.max_attempts);
    if let Some(root) = &config.plugins.root {
        host = host.root(root.clone());
    }
    let host = host.build()?;

    let mut failures = 0usize;
    for route in &config.routes {
        let source = PluginSource::new(&route.name, &route.module_path, &route.entry_type);
        match host.inspect(&source).await {
            Ok(inspection) if json => {
                println!("{}", serde_json::to_string(&inspection)?);
                if !inspection.outcome.reclaimed {
                    failures += 1;
                }
            }
            Ok(inspection) => {
                let declared = inspection
                    .route
                    .map(|r| format!("{} {}", r.method, r.path))
                    .unwrap_or_else(|| "(no route)".to_string());
                let verdict = if inspection.outcome.reclaimed {
                    "reclaimed"
                } else {
                    failures += 1;
                    "LEAKED"
                };
                println!(
                    "{:<20} {:<30} {} after {} attempt(s)",
                    route.name, declared, verdict, inspection.outcome.attempts_used
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("{:<20} error: {e}", route.name);
            }
        }
    }

    host.shutdown();

    if failures > 0 {
        anyhow::bail!("{failures} of {} route(s) failed inspection", config.routes.len());
    }
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{level}'"))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?,
    }

    Ok(())
}
