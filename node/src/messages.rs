//! User-facing message templates.
//!
//! Every string can be overridden from the `[messages]` config section.
//! Placeholders are written `{name}` and filled with [`fill`].

use serde::{Deserialize, Serialize};

/// Replaces every `{key}` in `template` with its value.
pub fn fill(template: &str, vars: &[(&str, String)]) -> String {
    let mut text = template.to_string();
    for (key, value) in vars {
        text = text.replace(&format!("{{{}}}", key), value);
    }
    text
}

/// Formats a coordinate the way messages show it.
pub fn coord(value: f64) -> String {
    format!("{:.1}", value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub no_permission: String,
    pub cooldown: String,
    pub unknown_command: String,
    pub world_not_found: String,
    pub server_not_found: String,
    pub warp: WarpMessages,
    pub spawn: SpawnMessages,
    pub random_tp: RandomTpMessages,
    pub tpa: TpaMessages,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            no_permission: "You don't have permission to do that.".to_string(),
            cooldown: "Please wait {seconds} more seconds before using this again.".to_string(),
            unknown_command: "Unknown command: {command}".to_string(),
            world_not_found: "World '{world}' does not exist on this server.".to_string(),
            server_not_found: "Server '{server}' is not part of the network.".to_string(),
            warp: WarpMessages::default(),
            spawn: SpawnMessages::default(),
            random_tp: RandomTpMessages::default(),
            tpa: TpaMessages::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpMessages {
    pub usage: String,
    pub usage_set: String,
    pub usage_delete: String,
    pub not_found: String,
    pub teleporting: String,
    pub teleported: String,
    pub set: String,
    pub deleted: String,
    pub list_empty: String,
    pub list_header: String,
    pub list_entry: String,
}

impl Default for WarpMessages {
    fn default() -> Self {
        Self {
            usage: "Usage: /warp <name>".to_string(),
            usage_set: "Usage: /setwarp <name>".to_string(),
            usage_delete: "Usage: /delwarp <name>".to_string(),
            not_found: "Warp '{name}' does not exist.".to_string(),
            teleporting: "Sending you to warp '{name}' on {server}...".to_string(),
            teleported: "Teleported to warp '{name}'.".to_string(),
            set: "Warp '{name}' set at {world} [{x}, {y}, {z}].".to_string(),
            deleted: "Warp '{name}' deleted.".to_string(),
            list_empty: "No warps have been set.".to_string(),
            list_header: "Warps:".to_string(),
            list_entry: " - {name} ({server}) {world} [{x}, {y}, {z}]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnMessages {
    pub not_set: String,
    pub teleporting: String,
    pub teleported: String,
    pub set: String,
    pub respawn: String,
}

impl Default for SpawnMessages {
    fn default() -> Self {
        Self {
            not_set: "The spawn point has not been set.".to_string(),
            teleporting: "Sending you to spawn on {server}...".to_string(),
            teleported: "Teleported to spawn.".to_string(),
            set: "Spawn set at {world} [{x}, {y}, {z}].".to_string(),
            respawn: "You have been returned to spawn.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomTpMessages {
    pub disabled: String,
    pub teleporting: String,
    pub coordinates: String,
    pub searching: String,
    pub completed: String,
    pub location: String,
    pub no_safe_location: String,
}

impl Default for RandomTpMessages {
    fn default() -> Self {
        Self {
            disabled: "Random teleport is disabled on {server}.".to_string(),
            teleporting: "Finding a random location on {server}...".to_string(),
            coordinates: "Target column: X={x}, Z={z}".to_string(),
            searching: "Searching for a safe place to land...".to_string(),
            completed: "Random teleport complete!".to_string(),
            location: "You landed at {world} [{x}, {y}, {z}].".to_string(),
            no_safe_location: "No safe landing spot found at X={x}, Z={z}. Try again.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpaMessages {
    pub usage: String,
    pub here_usage: String,
    pub to_usage: String,
    pub pos_usage: String,
    pub disabled: String,
    pub target_disabled: String,
    pub cannot_self: String,
    pub player_not_found: String,
    pub sent: String,
    pub here_sent: String,
    pub received: String,
    pub here_received: String,
    pub buttons: String,
    pub no_pending: String,
    pub requester_offline: String,
    pub accepted: String,
    pub denied: String,
    pub request_denied: String,
    pub teleported: String,
    pub teleporting: String,
}

impl Default for TpaMessages {
    fn default() -> Self {
        Self {
            usage: "Usage: /tpa <player>".to_string(),
            here_usage: "Usage: /tpahere <player>".to_string(),
            to_usage: "Usage: /tpto <player>".to_string(),
            pos_usage: "Usage: /tppos <server> <world> <x> <y> <z>".to_string(),
            disabled: "Teleport requests are disabled.".to_string(),
            target_disabled: "Teleport requests are disabled on {server}.".to_string(),
            cannot_self: "You cannot send a teleport request to yourself.".to_string(),
            player_not_found: "Player '{player}' is not online.".to_string(),
            sent: "Teleport request sent to {player}.".to_string(),
            here_sent: "Asked {player} to teleport to you.".to_string(),
            received: "{player} wants to teleport to you.".to_string(),
            here_received: "{player} wants you to teleport to them.".to_string(),
            buttons: "[Accept: /tpaccept] [Deny: /tpdeny] (expires in {seconds}s)".to_string(),
            no_pending: "You have no pending teleport request.".to_string(),
            requester_offline: "{player} is no longer online.".to_string(),
            accepted: "Teleport request from {player} accepted.".to_string(),
            denied: "Teleport request from {player} denied.".to_string(),
            request_denied: "{player} denied your teleport request.".to_string(),
            teleported: "Teleported to {player}.".to_string(),
            teleporting: "Teleporting to {player}...".to_string(),
        }
    }
}
