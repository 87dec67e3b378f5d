use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use tilegate::config::Config;
use tilegate::logger;
use tilegate::proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "tilegate")]
#[command(about = "Session-managing reverse proxy for cookie-authenticated tile services")]
struct Args {
    /// TOML configuration file; without it configuration comes from SP_* variables
    #[arg(short, long, env = "TILEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file_with_env(path).await?,
        None => Config::from_env()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    logger::init_tracing(&config.logging, args.verbose)?;
    info!("Starting tilegate tile proxy");
    match &args.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Configured from environment"),
    }

    let proxy_server = ProxyServer::from_config(&config).await?;
    proxy_server.run().await?;

    info!("Tilegate shutdown complete");
    Ok(())
}
