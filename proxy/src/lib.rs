//! Proxy tier of a teleport fleet.
//!
//! Owns the player sessions, is the only writer of the shared directory and
//! carries out `server-transfer` requests by moving sessions between nodes.

pub mod config;
pub mod console;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::{CliArgs, ProxyConfig};
pub use console::ConsoleCommand;
pub use error::{ConfigError, ProxyError};
pub use proxy::{Proxy, Session};
pub use router::{listen_transfers, SessionRouter};
