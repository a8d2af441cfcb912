//! Teleport intent wire format
//!
//! A `TeleportIntent` is the envelope published on the `teleport` channel.
//! Every node receives every intent and keeps only the ones whose
//! `destination` names it. The payload is an explicit tagged `Action`; the
//! two-party request protocol is a closed set of `TpaStep` phases, each
//! carrying exactly the fields that phase needs.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowercased lookup key used wherever player names are compared.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Identity of a player as it travels between processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    /// Opaque identity assigned by the proxy tier
    pub id: String,
    /// Case-preserving display name
    pub name: String,
}

impl PlayerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn has_name(&self, name: &str) -> bool {
        name_key(&self.name) == name_key(name)
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A point inside a named world of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn block_x(&self) -> i32 {
        self.x.floor() as i32
    }

    pub fn block_y(&self) -> i32 {
        self.y.floor() as i32
    }

    pub fn block_z(&self) -> i32 {
        self.z.floor() as i32
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:.1}, {:.1}, {:.1}]",
            self.world, self.x, self.y, self.z
        )
    }
}

/// Horizontal block column used by random teleports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub x: i32,
    pub z: i32,
}

/// Coarse classification of an intent, used for logging and cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Warp,
    RandomTeleport,
    ToSpawn,
    Tpa,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentKind::Warp => "warp",
            IntentKind::RandomTeleport => "random_teleport",
            IntentKind::ToSpawn => "to_spawn",
            IntentKind::Tpa => "tpa",
        };
        f.write_str(name)
    }
}

/// What the destination node should do with the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Warp {
        warp: String,
        location: Location,
    },
    ToSpawn {
        location: Location,
    },
    /// Coordinates are generated by the destination when absent.
    RandomTeleport {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        world: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<Column>,
    },
    Tpa {
        step: TpaStep,
    },
}

/// Phases of the two-party request protocol.
///
/// `player` on the surrounding intent is always the party the phase acts
/// on at the destination node; the phase fields carry the other party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TpaStep {
    /// `player` asks to travel to `target`.
    Request { target: String },
    /// `player` asks `target` to come to them.
    HereRequest { target: String },
    /// `player` (the accepter) should report their location so `requester`
    /// can be brought over.
    AcceptGetLocation {
        requester: PlayerRef,
        requester_node: String,
    },
    /// `player` (the requester) should report their location so `accepter`
    /// can be brought over.
    AcceptHereGetLocation {
        accepter: PlayerRef,
        accepter_node: String,
    },
    /// Fully resolved: place `player` at `location`, next to `anchor`.
    Arrive { location: Location, anchor: String },
    /// Seed a pending teleport to `target` before `player` is moved off `origin`.
    PrepareTeleport { target: String, origin: String },
    /// Seed a pending teleport to `location` before `player` is moved off `origin`.
    PrepareTeleportCoords { location: Location, origin: String },
    /// Ask the node hosting `player` to move them to `node`.
    MovePlayer { node: String },
    /// The request `player` sent was declined by `denier`.
    Deny { denier: String },
}

impl TpaStep {
    pub fn name(&self) -> &'static str {
        match self {
            TpaStep::Request { .. } => "request",
            TpaStep::HereRequest { .. } => "here_request",
            TpaStep::AcceptGetLocation { .. } => "accept_get_location",
            TpaStep::AcceptHereGetLocation { .. } => "accept_here_get_location",
            TpaStep::Arrive { .. } => "arrive",
            TpaStep::PrepareTeleport { .. } => "prepare_teleport",
            TpaStep::PrepareTeleportCoords { .. } => "prepare_teleport_coords",
            TpaStep::MovePlayer { .. } => "move_player",
            TpaStep::Deny { .. } => "deny",
        }
    }
}

/// The envelope carried on the teleport channel. Never mutated after
/// publishing; derived envelopes are built with the constructors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportIntent {
    pub player: PlayerRef,
    pub destination: String,
    pub action: Action,
}

impl TeleportIntent {
    pub fn warp(
        player: PlayerRef,
        destination: impl Into<String>,
        warp: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            player,
            destination: destination.into(),
            action: Action::Warp {
                warp: warp.into(),
                location,
            },
        }
    }

    pub fn to_spawn(player: PlayerRef, destination: impl Into<String>, location: Location) -> Self {
        Self {
            player,
            destination: destination.into(),
            action: Action::ToSpawn { location },
        }
    }

    pub fn random(
        player: PlayerRef,
        destination: impl Into<String>,
        world: Option<String>,
        column: Option<Column>,
    ) -> Self {
        Self {
            player,
            destination: destination.into(),
            action: Action::RandomTeleport { world, column },
        }
    }

    pub fn tpa(player: PlayerRef, destination: impl Into<String>, step: TpaStep) -> Self {
        Self {
            player,
            destination: destination.into(),
            action: Action::Tpa { step },
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self.action {
            Action::Warp { .. } => IntentKind::Warp,
            Action::ToSpawn { .. } => IntentKind::ToSpawn,
            Action::RandomTeleport { .. } => IntentKind::RandomTeleport,
            Action::Tpa { .. } => IntentKind::Tpa,
        }
    }

    /// Destination coordinates, when the intent already carries them.
    pub fn location(&self) -> Option<&Location> {
        match &self.action {
            Action::Warp { location, .. } | Action::ToSpawn { location } => Some(location),
            Action::Tpa {
                step: TpaStep::Arrive { location, .. },
            }
            | Action::Tpa {
                step: TpaStep::PrepareTeleportCoords { location, .. },
            } => Some(location),
            _ => None,
        }
    }

    pub fn is_for(&self, node: &str) -> bool {
        self.destination == node
    }

    pub fn encode(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Request for the proxy tier to move a connected player to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTransfer {
    pub player_id: String,
    pub node: String,
}

impl ServerTransfer {
    pub fn new(player_id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            node: node.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn alice() -> PlayerRef {
        PlayerRef::new("0000-a", "Alice")
    }

    #[test]
    fn test_warp_intent_wire_shape() {
        let intent = TeleportIntent::warp(
            alice(),
            "node2",
            "hub",
            Location::new("spawn", 10.0, 64.0, 10.0),
        );
        let value: serde_json::Value = serde_json::from_str(&intent.encode().unwrap()).unwrap();

        assert_eq!(value["destination"], "node2");
        assert_eq!(value["player"]["name"], "Alice");
        assert_eq!(value["action"]["kind"], "warp");
        assert_eq!(value["action"]["warp"], "hub");
        assert_eq!(value["action"]["location"]["world"], "spawn");
    }

    #[test]
    fn test_tpa_phase_tag() {
        let intent = TeleportIntent::tpa(
            alice(),
            "node1",
            TpaStep::AcceptGetLocation {
                requester: PlayerRef::new("0000-b", "Bob"),
                requester_node: "node2".to_string(),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&intent.encode().unwrap()).unwrap();

        assert_eq!(value["action"]["kind"], "tpa");
        assert_eq!(value["action"]["step"]["phase"], "accept_get_location");
        assert_eq!(value["action"]["step"]["requester"]["name"], "Bob");
        assert_eq!(intent.kind(), IntentKind::Tpa);
    }

    #[test]
    fn test_random_intent_without_coordinates() {
        let payload = r#"{"player":{"id":"1","name":"Zed"},"destination":"node3","action":{"kind":"random_teleport"}}"#;
        let intent = TeleportIntent::decode(payload).unwrap();

        assert_eq!(intent.kind(), IntentKind::RandomTeleport);
        assert!(intent.location().is_none());
        match intent.action {
            Action::RandomTeleport { world, column } => {
                assert!(world.is_none());
                assert!(column.is_none());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_location_defaults_rotation() {
        let payload = r#"{"world":"world","x":1.5,"y":70.0,"z":-3.5}"#;
        let loc: Location = serde_json::from_str(payload).unwrap();

        assert_approx_eq!(loc.yaw as f64, 0.0);
        assert_eq!(loc.block_x(), 1);
        assert_eq!(loc.block_z(), -4);
    }

    #[test]
    fn test_arrive_exposes_location() {
        let intent = TeleportIntent::tpa(
            alice(),
            "node1",
            TpaStep::Arrive {
                location: Location::new("world", 1.0, 2.0, 3.0),
                anchor: "Carol".to_string(),
            },
        );
        assert_eq!(intent.location().map(|l| l.world.as_str()), Some("world"));

        let request = TeleportIntent::tpa(
            alice(),
            "node1",
            TpaStep::Request {
                target: "Carol".to_string(),
            },
        );
        assert!(request.location().is_none());
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let err = TeleportIntent::decode("{\"player\":42}").unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));

        let err = TeleportIntent::decode(
            r#"{"player":{"id":"1","name":"Zed"},"destination":"n","action":{"kind":"tpa","step":{"phase":"dance"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_name_matching_ignores_case() {
        assert!(alice().has_name("aLiCe"));
        assert!(!alice().has_name("alicia"));
        assert_eq!(name_key("CaRoL"), "carol");
    }
}
