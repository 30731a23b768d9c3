//! hookfan - main entry point

use clap::{Parser, Subcommand};
use hookfan::config::ServiceConfig;
use hookfan::observability::{init_default_logging, init_logging, LogFormat};
use hookfan::server::{self, AppContext};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, Level};

/// Webhook fan-out service
#[derive(Parser)]
#[command(name = "hookfan")]
#[command(about = "Fan webhook deliveries out to remote worker agents")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HOOKFAN_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve webhooks until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, log_format(), false),
        _ => init_logging(Level::TRACE, log_format(), true),
    }

    info!("Starting hookfan v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn log_format() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()))
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ServiceConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["hookfan.toml", "config/hookfan.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ServiceConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create hookfan.toml"
                .into())
        }
    }
}

async fn run_service(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_address()?;
    let ctx = Arc::new(AppContext::from_config(&config).await?);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound, serving) = server::bind(ctx.clone(), addr, async move {
        let _ = shutdown_rx.await;
    })?;
    let server_task = tokio::spawn(serving);

    info!(address = %bound, "hookfan is accepting webhooks");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    ctx.health.set_ready(false);
    let _ = shutdown_tx.send(());
    server_task.await?;

    let stats = ctx.ledger.stats().await;
    info!(
        processing = stats.processing,
        total_processed = stats.counters.total_processed,
        "HTTP server stopped"
    );
    Ok(())
}

fn handle_config_command(
    config: ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!(webhooks = config.webhooks.len(), "Configuration validation complete");
    Ok(())
}
