//! The player-move primitive and the `server-transfer` consumer.

use crate::error::ProxyError;
use log::{debug, info, warn};
use shared::{subscribe_json, MessageBus, ServerTransfer, StoreError, Subscription, CHANNEL_SERVER_TRANSFER};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ProxyError>> + Send + 'a>>;

/// Relocates connected players between nodes.
pub trait SessionRouter: Send + Sync {
    /// Moves `player_id` to `node`. Resolves to `false` when the player was
    /// already there.
    fn move_player<'a>(&'a self, player_id: &'a str, node: &'a str) -> RouteFuture<'a>;
}

/// Honors transfer requests from the bus, one at a time in arrival order.
///
/// Requests naming unknown players or nodes are logged and skipped. The
/// worker stops when the returned subscription is released.
pub fn listen_transfers(
    bus: &dyn MessageBus,
    router: Arc<dyn SessionRouter>,
) -> Result<Subscription, StoreError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerTransfer>();

    tokio::spawn(async move {
        while let Some(transfer) = rx.recv().await {
            match router.move_player(&transfer.player_id, &transfer.node).await {
                Ok(true) => info!("Moved {} to {}", transfer.player_id, transfer.node),
                Ok(false) => debug!("{} is already on {}", transfer.player_id, transfer.node),
                Err(e) => warn!(
                    "Ignoring transfer of {} to {}: {}",
                    transfer.player_id, transfer.node, e
                ),
            }
        }
        debug!("Transfer worker stopped");
    });

    subscribe_json(bus, CHANNEL_SERVER_TRANSFER, move |transfer: ServerTransfer| {
        if let Err(e) = tx.send(transfer) {
            warn!("Transfer worker is gone: {}", e);
        }
    })
}
