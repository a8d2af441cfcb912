//! Types and contracts shared by the hub, the game nodes and the proxy.
//!
//! Nodes never talk to each other directly. Everything crosses the
//! `MessageBus` (JSON payloads on named channels) or the `DirectoryStore`
//! (who is online where). Both contracts have an in-process backend for
//! single-process fleets and tests, and a TCP client for a remote hub.

pub mod bus;
pub mod directory;
pub mod error;
pub mod hub;
pub mod intent;
pub mod session;

pub use bus::{
    publish_json, subscribe_json, Handler, MemoryBus, MessageBus, Subscription,
    CHANNEL_SERVER_TRANSFER, CHANNEL_SESSION, CHANNEL_TELEPORT,
};
pub use directory::{find_player, DirectoryEntry, DirectoryStore, MemoryDirectory, StoreFuture};
pub use error::StoreError;
pub use hub::RemoteHub;
pub use intent::{
    name_key, Action, Column, IntentKind, Location, PlayerRef, ServerTransfer, TeleportIntent,
    TpaStep,
};
pub use session::SessionEvent;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, saturating at zero on clock skew.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
