use clap::Parser;
use log::{error, info};
use node::{CliArgs, MemoryWarpCatalog, Node, NodeConfig};
use shared::RemoteHub;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: set RUST_LOG=info to follow teleports on this node");
    }

    let args = CliArgs::parse();
    let mut config = NodeConfig::load(&args.config)?;
    config.apply_cli_overrides(&args);
    info!("Starting node {} against hub {}", config.server_name, config.hub);

    // A node cannot coordinate anything without the hub
    let hub = RemoteHub::connect(&config.hub).await.map_err(|e| {
        error!("Hub at {} is unreachable: {}", config.hub, e);
        e
    })?;
    let warps = Arc::new(MemoryWarpCatalog::seeded(&config.warps, config.spawn.as_ref()));

    let node = Node::new(config, Arc::new(hub.clone()), Arc::new(hub), warps);
    let handle = node.start().await?;
    info!("Node {} is up", handle.server_name());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, shutting down");
    handle.shutdown();

    Ok(())
}
