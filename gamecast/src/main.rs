mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use gamecast_core::{
    bootstrap::{init_services, load_config, load_config_from},
    logging,
};

use server::GamecastServer;

/// Live game-state relay
#[derive(Debug, Parser)]
#[command(name = "gamecast", version, about)]
struct Args {
    /// Path to a YAML config file (searched for when omitted)
    #[arg(short, long, env = "GAMECAST_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = match args.config.as_deref() {
        Some(path) => load_config_from(Some(path))?,
        None => load_config()?,
    };

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Gamecast relay starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize services
    let services = init_services(&config);

    // 4. Run until shutdown
    GamecastServer::new(Arc::new(config), services).start().await
}
