use crate::intent::PlayerRef;
use serde::{Deserialize, Serialize};

/// Connection-level events the proxy tier delivers to the node hosting a
/// player. Published on the session channel; a node ignores events naming
/// another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Connect {
        player: PlayerRef,
        node: String,
        #[serde(default)]
        permissions: Vec<String>,
    },
    Disconnect {
        player: PlayerRef,
        node: String,
    },
    /// A command line typed by the player, e.g. `/warp hub`.
    Command {
        player: PlayerRef,
        node: String,
        line: String,
    },
    Respawn {
        player: PlayerRef,
        node: String,
    },
}

impl SessionEvent {
    pub fn node(&self) -> &str {
        match self {
            SessionEvent::Connect { node, .. }
            | SessionEvent::Disconnect { node, .. }
            | SessionEvent::Command { node, .. }
            | SessionEvent::Respawn { node, .. } => node,
        }
    }

    pub fn player(&self) -> &PlayerRef {
        match self {
            SessionEvent::Connect { player, .. }
            | SessionEvent::Disconnect { player, .. }
            | SessionEvent::Command { player, .. }
            | SessionEvent::Respawn { player, .. } => player,
        }
    }
}
