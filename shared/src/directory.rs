//! Shared player/node directory
//!
//! The proxy tier is the only writer. Game nodes read it to find which node
//! hosts a player. Entries are indexed by lowercased name and stored as
//! `"node:DisplayName"`, so lookups are case-insensitive while the display
//! name keeps its original case.

use crate::error::StoreError;
use crate::intent::name_key;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

pub trait DirectoryStore: Send + Sync {
    /// Replaces the whole player table with `players` (display name to node).
    fn set_all<'a>(&'a self, players: HashMap<String, String>) -> StoreFuture<'a, ()>;

    fn put<'a>(&'a self, name: &'a str, node: &'a str) -> StoreFuture<'a, ()>;

    fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    /// Every online player, display name to node.
    fn all<'a>(&'a self) -> StoreFuture<'a, HashMap<String, String>>;

    fn node_of<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set_nodes<'a>(&'a self, nodes: HashSet<String>) -> StoreFuture<'a, ()>;

    fn nodes<'a>(&'a self) -> StoreFuture<'a, HashSet<String>>;
}

/// A resolved directory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub node: String,
}

/// Case-insensitive lookup that also recovers the display name.
pub async fn find_player(
    directory: &dyn DirectoryStore,
    name: &str,
) -> Result<Option<DirectoryEntry>, StoreError> {
    let wanted = name_key(name);
    let players = directory.all().await?;
    Ok(players
        .into_iter()
        .find(|(display, _)| name_key(display) == wanted)
        .map(|(name, node)| DirectoryEntry { name, node }))
}

pub fn encode_entry(node: &str, name: &str) -> String {
    format!("{}:{}", node, name)
}

/// Splits a stored value into `(node, display name)`.
pub fn decode_entry(value: &str) -> Option<(&str, &str)> {
    value.split_once(':')
}

/// In-process directory, shared by cloning.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    players: Arc<DashMap<String, String>>,
    nodes: Arc<DashSet<String>>,
    offline: Arc<AtomicBool>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the backing store: every operation fails until
    /// availability is restored.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Release);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Acquire) {
            Err(StoreError::unavailable("directory offline"))
        } else {
            Ok(())
        }
    }

    fn ready<'a, T: Send + 'a>(
        &self,
        op: impl FnOnce() -> T,
    ) -> StoreFuture<'a, T> {
        let result = self.check().map(|_| op());
        Box::pin(std::future::ready(result))
    }
}

impl DirectoryStore for MemoryDirectory {
    fn set_all<'a>(&'a self, players: HashMap<String, String>) -> StoreFuture<'a, ()> {
        self.ready(|| {
            self.players.clear();
            for (name, node) in players {
                self.players
                    .insert(name_key(&name), encode_entry(&node, &name));
            }
        })
    }

    fn put<'a>(&'a self, name: &'a str, node: &'a str) -> StoreFuture<'a, ()> {
        self.ready(|| {
            self.players.insert(name_key(name), encode_entry(node, name));
        })
    }

    fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        self.ready(|| {
            self.players.remove(&name_key(name));
        })
    }

    fn all<'a>(&'a self) -> StoreFuture<'a, HashMap<String, String>> {
        self.ready(|| {
            self.players
                .iter()
                .filter_map(|entry| {
                    decode_entry(entry.value())
                        .map(|(node, name)| (name.to_string(), node.to_string()))
                })
                .collect()
        })
    }

    fn node_of<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<String>> {
        self.ready(|| {
            self.players.get(&name_key(name)).and_then(|entry| {
                decode_entry(entry.value()).map(|(node, _)| node.to_string())
            })
        })
    }

    fn set_nodes<'a>(&'a self, nodes: HashSet<String>) -> StoreFuture<'a, ()> {
        self.ready(|| {
            self.nodes.clear();
            for node in nodes {
                self.nodes.insert(node);
            }
        })
    }

    fn nodes<'a>(&'a self) -> StoreFuture<'a, HashSet<String>> {
        self.ready(|| self.nodes.iter().map(|node| node.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_put_and_case_insensitive_lookup() {
        let dir = MemoryDirectory::new();
        assert_ok!(dir.put("Carol", "node2").await);

        assert_eq!(dir.node_of("carol").await.unwrap(), Some("node2".to_string()));
        assert_eq!(dir.node_of("CAROL").await.unwrap(), Some("node2".to_string()));

        let all = dir.all().await.unwrap();
        assert_eq!(all.get("Carol"), Some(&"node2".to_string()));
    }

    #[tokio::test]
    async fn test_put_moves_player() {
        let dir = MemoryDirectory::new();
        dir.put("Bob", "node1").await.unwrap();
        dir.put("bob", "node3").await.unwrap();

        let all = dir.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("bob"), Some(&"node3".to_string()));
    }

    #[tokio::test]
    async fn test_remove_and_set_all() {
        let dir = MemoryDirectory::new();
        dir.put("Alice", "node1").await.unwrap();
        dir.remove("ALICE").await.unwrap();
        assert!(dir.node_of("alice").await.unwrap().is_none());

        dir.put("Stale", "node9").await.unwrap();
        let rebuilt = HashMap::from([
            ("Dave".to_string(), "node1".to_string()),
            ("Eve".to_string(), "node2".to_string()),
        ]);
        dir.set_all(rebuilt.clone()).await.unwrap();
        assert_eq!(dir.all().await.unwrap(), rebuilt);

        dir.set_all(HashMap::new()).await.unwrap();
        assert!(dir.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_set() {
        let dir = MemoryDirectory::new();
        let nodes: HashSet<String> = ["node1", "node2"].iter().map(|n| n.to_string()).collect();
        dir.set_nodes(nodes.clone()).await.unwrap();
        assert_eq!(dir.nodes().await.unwrap(), nodes);
    }

    #[tokio::test]
    async fn test_find_player_recovers_display_name() {
        let dir = MemoryDirectory::new();
        dir.put("McName", "node4").await.unwrap();

        let entry = find_player(&dir, "mcname").await.unwrap().unwrap();
        assert_eq!(entry.name, "McName");
        assert_eq!(entry.node, "node4");
        assert!(find_player(&dir, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_operation() {
        let dir = MemoryDirectory::new();
        dir.set_available(false);

        assert_err!(dir.put("Alice", "node1").await);
        assert_err!(dir.all().await);
        let err = dir.nodes().await.unwrap_err();
        assert!(err.is_unavailable());

        dir.set_available(true);
        assert_ok!(dir.put("Alice", "node1").await);
    }

    #[test]
    fn test_entry_encoding_keeps_colons_in_name_side() {
        assert_eq!(encode_entry("node1", "Alice"), "node1:Alice");
        assert_eq!(decode_entry("node1:Al:ice"), Some(("node1", "Al:ice")));
        assert_eq!(decode_entry("garbage"), None);
    }
}
