//! # Tidewire Server
//!
//! Task dispatch and real-time result fan-out relay.
//!
//! Accepts backtest, optimization and walk-forward submissions over HTTP,
//! publishes them to the compute tier through Redis pub/sub, and pushes the
//! progress/complete/error events that come back to each user's WebSocket
//! connections.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tidewire_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings};
use tidewire_server::{
    create_app,
    infra::{
        pubsub::InMemoryBroker,
        startup::{self, Brokers},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "tidewire-server")]
#[command(about = "Task dispatch and real-time result fan-out relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to a tidewire.toml (overrides TIDEWIRE_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Use a process-local broker instead of Redis. Tasks never leave this
    /// process; meant for local frontend work.
    #[arg(long, env = "TIDEWIRE_IN_MEMORY_BROKER", default_value_t = false)]
    in_memory_broker: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the configuration, print it with any warnings and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, warnings) = load_runtime_config(&cli.serve)?;

    if let Some(Command::CheckConfig) = cli.command {
        print_config_report(&config, &warnings);
        return Ok(());
    }

    log_config_warnings(&warnings);
    run_server(config, &cli.serve).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<(Config, ConfigWarnings)> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    Ok((config, warnings))
}

fn log_config_warnings(warnings: &ConfigWarnings) {
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

fn print_config_report(config: &Config, warnings: &ConfigWarnings) {
    println!("{config:#?}");
    if warnings.is_empty() {
        println!("\nno configuration warnings");
        return;
    }
    println!("\n{} configuration warning(s):", warnings.len());
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => println!("  - {} (hint: {hint})", warning.message),
            None => println!("  - {}", warning.message),
        }
    }
}

async fn run_server(config: Config, args: &ServeArgs) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let brokers = if args.in_memory_broker {
        warn!("using the in-process broker; tasks will not reach any compute tier");
        Brokers::in_memory(InMemoryBroker::new())
    } else {
        info!(redis = %config.redis.redacted_url(), "connecting to redis");
        Brokers::redis(&config.redis).await?
    };

    let state = startup::assemble(Arc::clone(&config), brokers);
    let cancel = CancellationToken::new();
    let background = startup::spawn_background(&state, cancel.clone());

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
            .await
            .with_context(|| {
                format!("failed to bind {}:{}", config.server.host, config.server.port)
            })?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        gateway = %config.gateway.route_path(),
        publish_retries = config.publisher.max_retries,
        "Starting Tidewire relay"
    );

    let app = create_app(state);
    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        })
        .await;

    cancel.cancel();
    background.join().await;
    info!("Tidewire relay stopped");

    served.context("HTTP server failed")
}
