mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use streamgate_core::{
    bootstrap::{init_services, load_config, log_config_summary},
    logging,
};

use server::StreamgateServer;

#[derive(Parser, Debug)]
#[command(name = "streamgate")]
#[command(about = "Token-gated HLS playback edge", long_about = None)]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long, env = "STREAMGATE_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Streamgate starting...");
    log_config_summary(&config);

    // 3. Initialize services
    let services = init_services(&config).await?;

    // 4. Serve until shutdown
    StreamgateServer::new(config, services).run().await
}
