//! Game node side of cross-server teleports.
//!
//! A node hosts players in its worlds, publishes teleport intents for
//! players leaving it, and admits intents for players arriving. An intent
//! that arrives before its player is parked as a pending teleport and
//! applied when the player connects.

pub mod commands;
pub mod config;
pub mod cooldown;
pub mod coordinator;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod pending;
pub mod tickets;
pub mod warps;
pub mod world;

pub use commands::Command;
pub use config::{CliArgs, ConfigError, NodeConfig};
pub use coordinator::{Node, NodeEvent, NodeHandle};
pub use error::TeleportFailure;
pub use warps::{MemoryWarpCatalog, WarpCatalog, WarpRecord};
pub use world::{OnlinePlayer, WorldHandle};
