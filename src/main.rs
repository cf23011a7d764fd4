//! MQTT → HTTP bridge - Main Entry Point

use clap::{Parser, Subcommand};
use mqtt_http_bridge::bridge::{BridgeController, BridgeLifecycle, TracingStatusSink};
use mqtt_http_bridge::config::BridgeConfig;
use mqtt_http_bridge::delivery::HttpDeliveryClient;
use mqtt_http_bridge::error::{BridgeError, BridgeResult};
use mqtt_http_bridge::observability::{
    init_default_logging, init_logging, BridgeStats, HealthServer, LogFormat,
};
use mqtt_http_bridge::transport::mqtt::{MqttConnector, MqttError, ReconnectConfig};
use mqtt_http_bridge::transport::Session;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

/// Forward JSON messages from an MQTT topic to an HTTP API endpoint
#[derive(Parser)]
#[command(name = "mqtt-http-bridge")]
#[command(about = "Forward JSON messages from an MQTT topic to an HTTP API endpoint")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: bridge.toml, then config/bridge.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // .env is optional
    let dotenv = dotenvy::dotenv();
    init_observability(cli.verbose);
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn init_observability(verbose: u8) {
    if verbose == 0 {
        init_default_logging();
        return;
    }

    let level = if verbose == 1 {
        Level::DEBUG
    } else {
        Level::TRACE
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format, false);
}

fn load_configuration(config_path: Option<&std::path::Path>) -> BridgeResult<BridgeConfig> {
    let (config, source) = BridgeConfig::discover(config_path)?;
    match source {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using defaults and environment"),
    }
    Ok(config)
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    info!("🌉 MQTT → HTTP bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "📡 Broker {}:{} topic {} (QoS {})",
        config.broker.host, config.broker.port, config.broker.topic, config.broker.qos
    );
    info!(
        "🎯 API endpoint {} (timeout {}ms)",
        config.api.endpoint_url, config.api.timeout_ms
    );

    // Bootstrap: build components with injected dependencies
    let stats = Arc::new(BridgeStats::new());
    let delivery = Arc::new(HttpDeliveryClient::new()?);
    let controller = Arc::new(BridgeController::new(
        &config,
        delivery,
        Arc::new(TracingStatusSink),
        stats.clone(),
    ));
    let transport = MqttConnector::new(
        config.broker.clone(),
        ReconnectConfig::from(&config.reconnect),
        controller.clone(),
    )?;
    let client_id = transport.client_id().to_string();
    info!("🆔 MQTT client id {}", client_id);

    let mut bridge = BridgeLifecycle::new(transport, controller.clone(), config.queue.workers);

    if config.health.enabled {
        let health_server = Arc::new(HealthServer::new(
            client_id,
            config.health.port,
            bridge.session_watch(),
            stats,
            controller.queue(),
        ));
        tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server error: {}", e);
            }
        });
    }

    // Register signal handlers before connecting so an early Ctrl+C is not lost
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    bridge.start().await?;
    info!("Bridge is running, press Ctrl+C to stop");

    let gave_up = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = wait_for_permanent_disconnect(bridge.session_watch()) => {
            error!("MQTT reconnection attempts exhausted, shutting down...");
            true
        }
    };

    bridge.shutdown().await?;
    info!("👋 Bridge stopped");

    if gave_up {
        return Err(MqttError::ConnectionLost("reconnection attempts exhausted".to_string()).into());
    }
    Ok(())
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| BridgeError::internal(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!("Configuration is valid");
    Ok(())
}

/// Resolves once the connector stops reconnecting for good
async fn wait_for_permanent_disconnect(mut session_rx: watch::Receiver<Session>) {
    loop {
        if session_rx.borrow_and_update().gave_up {
            return;
        }
        if session_rx.changed().await.is_err() {
            // Connector dropped; only a signal can end the run now
            std::future::pending::<()>().await;
        }
    }
}
