use clap::Parser;
use log::{error, info, warn};
use proxy::console::HELP;
use proxy::{listen_transfers, CliArgs, ConsoleCommand, Proxy, ProxyConfig, ProxyError};
use shared::{MessageBus, RemoteHub};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: set RUST_LOG=info to follow sessions and transfers");
    }

    let args = CliArgs::parse();
    let mut config = ProxyConfig::load(&args.config)?;
    config.apply_cli_overrides(&args);

    let hub = RemoteHub::connect(&config.hub).await.map_err(|e| {
        error!("Hub at {} is unreachable: {}", config.hub, e);
        e
    })?;
    let bus: Arc<dyn MessageBus> = Arc::new(hub.clone());
    let proxy = Arc::new(Proxy::new(config.nodes.clone(), Arc::clone(&bus), Arc::new(hub)));
    proxy.start().await?;
    let transfers = listen_transfers(&*bus, proxy.clone())?;
    info!("Proxy ready for nodes {:?}", proxy.nodes());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !run_line(&proxy, &line).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read console: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    transfers.unsubscribe();
    if let Err(e) = proxy.shutdown().await {
        warn!("Failed to clear the directory: {}", e);
    }
    Ok(())
}

/// Runs one console line. Returns `false` once the console should close.
async fn run_line(proxy: &Proxy, line: &str) -> bool {
    let command = match ConsoleCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(e) => {
            println!("{}", e);
            return true;
        }
    };

    let result = match command {
        ConsoleCommand::Login {
            name,
            node,
            permissions,
        } => proxy
            .login(&name, &node, permissions)
            .await
            .map(|player| println!("{} is connected to {} as {}", player.name, node, player.id)),
        ConsoleCommand::Logout { name } => match proxy.session_by_name(&name) {
            Some(session) => proxy.logout(&session.player.id).await,
            None => Err(ProxyError::UnknownPlayer(name)),
        },
        ConsoleCommand::Move { name, node } => match proxy.session_by_name(&name) {
            Some(session) => proxy.switch(&session.player.id, &node).await.map(|moved| {
                if !moved {
                    println!("{} is already on {}", name, node);
                }
            }),
            None => Err(ProxyError::UnknownPlayer(name)),
        },
        ConsoleCommand::As { name, line } => proxy.command(&name, &line),
        ConsoleCommand::Respawn { name } => proxy.respawn(&name),
        ConsoleCommand::List => {
            for session in proxy.sessions() {
                println!("{} ({}) on {}", session.player.name, session.player.id, session.node);
            }
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => return false,
    };

    if let Err(e) = result {
        println!("{}", e);
    }
    true
}
