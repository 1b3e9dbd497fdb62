//! Charge gateway CLI server
//!
//! ```sh
//! # Default config (~/.config/charge-gateway/config.toml, or $GATEWAY_CONFIG)
//! charge-gateway
//!
//! # Custom config path
//! charge-gateway --config /etc/charge-gateway/config.toml
//!
//! # Override ports
//! charge-gateway --api-port 8080 --ws-port 9000
//!
//! # Validate config without starting
//! charge-gateway --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use charge_gateway::config::{resolve_config_path, AppConfig};
use charge_gateway::server::{init_tracing, ServerHandle};

/// OCPP 1.6 charge-point session gateway.
#[derive(Parser, Debug)]
#[command(
    name = "charge-gateway",
    version,
    about = "OCPP 1.6 session gateway for EV charging stations",
    long_about = "WebSocket gateway for OCPP 1.6 charge points with energy-limited \
                  sessions, settlement and a command API.\n\n\
                  Default config: ~/.config/charge-gateway/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML). Falls back to $GATEWAY_CONFIG.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the REST API listen port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the WebSocket listen port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);

    let loaded = AppConfig::load(&config_path);
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => AppConfig::default(),
    };

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config);

    match loaded {
        Ok(_) => info!("Configuration loaded from {}", config_path.display()),
        Err(e) => {
            if cli.check {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
            error!("Failed to load config: {}", e);
            error!("Using default configuration.");
        }
    }

    if let Some(port) = cli.api_port {
        info!("CLI override: api_port = {}", port);
        config.server.api_port = port;
    }
    if let Some(port) = cli.ws_port {
        info!("CLI override: ws_port = {}", port);
        config.server.ws_port = port;
    }

    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   API address : {}", config.api_address());
        println!("   WS address  : {}", config.ws_address());
        println!("   Database    : {}", config.database.url);
        println!("   Duplicates  : {:?}", config.gateway.duplicate_connection_policy);
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    let handle = ServerHandle::start(config).await?;
    handle.install_signal_handler();

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.wait().await;

    Ok(())
}
