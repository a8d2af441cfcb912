use crate::messages::{fill, Messages};
use thiserror::Error;

/// Why a teleport or handshake step did not happen.
///
/// These are protocol outcomes, not process errors: every variant renders
/// into a message for the player and the flow returns to idle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeleportFailure {
    #[error("player {0} not found")]
    PlayerNotFound(String),
    #[error("world {0} not found")]
    WorldNotFound(String),
    #[error("no safe location at {x},{z}")]
    NoSafeLocation { x: i32, z: i32 },
    #[error("no pending teleport request")]
    TicketExpiredOrAbsent,
    #[error("player {0} is not on this node")]
    NotPresent(String),
    #[error("world context stopped")]
    WorldStopped,
    /// Refused before anything happened; carries the rendered reason.
    #[error("refused: {0}")]
    Refused(String),
}

impl TeleportFailure {
    pub fn render(&self, messages: &Messages) -> String {
        match self {
            TeleportFailure::PlayerNotFound(name) | TeleportFailure::NotPresent(name) => {
                fill(&messages.tpa.player_not_found, &[("player", name.clone())])
            }
            TeleportFailure::WorldNotFound(world) => {
                fill(&messages.world_not_found, &[("world", world.clone())])
            }
            TeleportFailure::NoSafeLocation { x, z } => fill(
                &messages.random_tp.no_safe_location,
                &[("x", x.to_string()), ("z", z.to_string())],
            ),
            TeleportFailure::TicketExpiredOrAbsent => messages.tpa.no_pending.clone(),
            TeleportFailure::WorldStopped => self.to_string(),
            TeleportFailure::Refused(reason) => reason.clone(),
        }
    }
}
