//! Named warp and spawn records.
//!
//! `WarpCatalog` is the seam to the fleet's persistent warp table. The
//! in-memory catalog below serves a single process (or an in-process fleet
//! sharing one `Arc`), seeded from the node config.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::{name_key, Location};

/// Key the spawn point is stored under; never listed as a warp.
pub const SPAWN_KEY: &str = "_spawn";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpRecord {
    #[serde(default)]
    pub name: String,
    /// Node hosting the warp's world
    pub node: String,
    pub location: Location,
}

impl WarpRecord {
    pub fn new(name: impl Into<String>, node: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            location,
        }
    }
}

pub trait WarpCatalog: Send + Sync {
    /// Case-insensitive lookup.
    fn get(&self, name: &str) -> Option<WarpRecord>;

    /// Creates or replaces a warp.
    fn set(&self, record: WarpRecord);

    /// Returns whether a warp was removed.
    fn delete(&self, name: &str) -> bool;

    /// All warps sorted by name, excluding the spawn point.
    fn all(&self) -> Vec<WarpRecord>;

    fn spawn(&self) -> Option<WarpRecord>;

    fn set_spawn(&self, node: &str, location: Location);
}

#[derive(Debug, Default)]
pub struct MemoryWarpCatalog {
    records: DashMap<String, WarpRecord>,
}

impl MemoryWarpCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(warps: &[WarpRecord], spawn: Option<&WarpRecord>) -> Self {
        let catalog = Self::new();
        for warp in warps {
            catalog.set(warp.clone());
        }
        if let Some(spawn) = spawn {
            catalog.set_spawn(&spawn.node, spawn.location.clone());
        }
        catalog
    }
}

impl WarpCatalog for MemoryWarpCatalog {
    fn get(&self, name: &str) -> Option<WarpRecord> {
        if name_key(name) == SPAWN_KEY {
            return None;
        }
        self.records.get(&name_key(name)).map(|r| r.clone())
    }

    fn set(&self, record: WarpRecord) {
        self.records.insert(name_key(&record.name), record);
    }

    fn delete(&self, name: &str) -> bool {
        if name_key(name) == SPAWN_KEY {
            return false;
        }
        self.records.remove(&name_key(name)).is_some()
    }

    fn all(&self) -> Vec<WarpRecord> {
        let mut warps: Vec<WarpRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key() != SPAWN_KEY)
            .map(|entry| entry.value().clone())
            .collect();
        warps.sort_by_key(|w| name_key(&w.name));
        warps
    }

    fn spawn(&self) -> Option<WarpRecord> {
        self.records.get(SPAWN_KEY).map(|r| r.clone())
    }

    fn set_spawn(&self, node: &str, location: Location) {
        self.records
            .insert(SPAWN_KEY.to_string(), WarpRecord::new(SPAWN_KEY, node, location));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> WarpRecord {
        WarpRecord::new("Hub", "node2", Location::new("spawn", 10.0, 64.0, 10.0))
    }

    #[test]
    fn test_lookup_ignores_case() {
        let catalog = MemoryWarpCatalog::new();
        catalog.set(hub());

        assert_eq!(catalog.get("hub"), Some(hub()));
        assert_eq!(catalog.get("HUB").unwrap().node, "node2");
        assert!(catalog.get("mine").is_none());
    }

    #[test]
    fn test_spawn_is_not_a_warp() {
        let catalog = MemoryWarpCatalog::seeded(&[hub()], None);
        catalog.set_spawn("node1", Location::new("world", 0.5, 70.0, 0.5));

        assert_eq!(catalog.all(), vec![hub()]);
        assert!(catalog.get(SPAWN_KEY).is_none());
        assert!(!catalog.delete(SPAWN_KEY));
        assert_eq!(catalog.spawn().unwrap().node, "node1");
    }

    #[test]
    fn test_delete_and_sorted_listing() {
        let catalog = MemoryWarpCatalog::new();
        catalog.set(WarpRecord::new("zoo", "n", Location::new("w", 0.0, 0.0, 0.0)));
        catalog.set(WarpRecord::new("Arena", "n", Location::new("w", 0.0, 0.0, 0.0)));
        catalog.set(hub());

        let names: Vec<String> = catalog.all().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["Arena", "Hub", "zoo"]);

        assert!(catalog.delete("ZOO"));
        assert!(!catalog.delete("zoo"));
        assert_eq!(catalog.all().len(), 2);
    }
}
