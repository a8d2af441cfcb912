use clap::Parser;
use hub::HubServer;
use log::{error, info};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Directory and message hub for a teleport fleet")]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value = "6380")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: set RUST_LOG=info to see hub traffic");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let server = HubServer::bind(&address).await?;
    let handle = server.spawn()?;
    info!("Hub ready on {}", handle.addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, shutting down");
    handle.shutdown().await;

    Ok(())
}
