//! Pending teleports
//!
//! A single slot per player holding the latest intent that arrived while
//! the player was not on this node. The slot is consumed when the player
//! connects, before the join completes, so the initial spawn position
//! already reflects the teleport.
//!
//! Slots can only be read by clearing them, so an intent is applied at
//! most once.

use dashmap::DashMap;
use log::debug;
use shared::TeleportIntent;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct PendingTeleports {
    slots: Arc<DashMap<String, TeleportIntent>>,
}

impl PendingTeleports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `intent` for `player_id`, replacing any earlier one.
    ///
    /// Returns the displaced intent. Its owner is not notified.
    pub fn admit(&self, player_id: &str, intent: TeleportIntent) -> Option<TeleportIntent> {
        debug!(
            "Admitting pending {} for {} ({})",
            intent.kind(),
            intent.player,
            player_id
        );
        let displaced = self.slots.insert(player_id.to_string(), intent);
        if let Some(ref old) = displaced {
            debug!("Pending {} for {} was overwritten", old.kind(), player_id);
        }
        displaced
    }

    /// Atomically removes and returns the intent for `player_id`.
    pub fn take_if_present(&self, player_id: &str) -> Option<TeleportIntent> {
        self.slots.remove(player_id).map(|(_, intent)| intent)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Location, PlayerRef};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn warp(player: &str, n: u32) -> TeleportIntent {
        TeleportIntent::warp(
            PlayerRef::new(player, player),
            "node2",
            format!("w{}", n),
            Location::new("world", n as f64, 64.0, 0.0),
        )
    }

    #[test]
    fn test_second_admit_replaces_first() {
        let pending = PendingTeleports::new();
        assert!(pending.admit("alice", warp("alice", 1)).is_none());

        let displaced = pending.admit("alice", warp("alice", 2)).unwrap();
        assert_eq!(displaced, warp("alice", 1));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.take_if_present("alice"), Some(warp("alice", 2)));
    }

    #[test]
    fn test_take_twice_yields_once() {
        let pending = PendingTeleports::new();
        pending.admit("bob", warp("bob", 1));

        assert!(pending.take_if_present("bob").is_some());
        assert!(pending.take_if_present("bob").is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_players_are_independent() {
        let pending = PendingTeleports::new();
        pending.admit("a", warp("a", 1));
        pending.admit("b", warp("b", 2));

        assert_eq!(pending.take_if_present("a"), Some(warp("a", 1)));
        assert_eq!(pending.take_if_present("b"), Some(warp("b", 2)));
    }

    #[test]
    fn test_racing_admit_and_take_never_double_apply() {
        let pending = PendingTeleports::new();
        let taken = Arc::new(Mutex::new(Vec::new()));

        let writer = {
            let pending = pending.clone();
            std::thread::spawn(move || {
                for n in 0..500 {
                    pending.admit("carol", warp("carol", n));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let pending = pending.clone();
                let taken = Arc::clone(&taken);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(intent) = pending.take_if_present("carol") {
                            taken.lock().unwrap().push(intent);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        if let Some(last) = pending.take_if_present("carol") {
            taken.lock().unwrap().push(last);
        }

        let taken = taken.lock().unwrap();
        let distinct: HashSet<String> = taken
            .iter()
            .map(|intent| format!("{:?}", intent.location()))
            .collect();
        assert_eq!(distinct.len(), taken.len());
        assert!(!taken.is_empty());
        assert!(pending.is_empty());
    }
}
