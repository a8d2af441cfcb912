//! Player sessions and directory maintenance.
//!
//! The proxy is the only writer of the directory. Every session change is
//! written to the directory first and announced to the nodes second, so a
//! node that sees a player connect can already find them by name.

use crate::error::ProxyError;
use crate::router::{RouteFuture, SessionRouter};
use dashmap::DashMap;
use log::{debug, info};
use rand::Rng;
use shared::{
    name_key, publish_json, timestamp_millis, DirectoryStore, MessageBus, PlayerRef,
    SessionEvent, CHANNEL_SESSION,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub player: PlayerRef,
    pub node: String,
    pub permissions: Vec<String>,
    /// Unix millis of the login
    pub connected_at: u64,
}

pub struct Proxy {
    bus: Arc<dyn MessageBus>,
    directory: Arc<dyn DirectoryStore>,
    nodes: HashSet<String>,
    sessions: DashMap<String, Session>,
}

/// Random identity in the familiar 8-4-4-4-12 hex layout.
pub fn new_player_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>(),
        rng.gen::<u16>(),
        rng.gen::<u64>() & 0xffff_ffff_ffff
    )
}

impl Proxy {
    pub fn new(
        nodes: impl IntoIterator<Item = String>,
        bus: Arc<dyn MessageBus>,
        directory: Arc<dyn DirectoryStore>,
    ) -> Self {
        Proxy {
            bus,
            directory,
            nodes: nodes.into_iter().collect(),
            sessions: DashMap::new(),
        }
    }

    /// Registers the node set and rebuilds the player table from the
    /// sessions held right now.
    pub async fn start(&self) -> Result<(), ProxyError> {
        self.directory.set_nodes(self.nodes.clone()).await?;
        let players: HashMap<String, String> = self
            .sessions
            .iter()
            .map(|s| (s.player.name.clone(), s.node.clone()))
            .collect();
        let count = players.len();
        self.directory.set_all(players).await?;
        info!(
            "Proxy registered {} nodes and {} players",
            self.nodes.len(),
            count
        );
        Ok(())
    }

    /// Clears the player table.
    pub async fn shutdown(&self) -> Result<(), ProxyError> {
        self.directory.set_all(HashMap::new()).await?;
        info!("Proxy cleared the directory");
        Ok(())
    }

    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.nodes.iter().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Connects a new player to `node` and returns their identity.
    pub async fn login(
        &self,
        name: &str,
        node: &str,
        permissions: Vec<String>,
    ) -> Result<PlayerRef, ProxyError> {
        self.check_node(node)?;
        if self.session_by_name(name).is_some() {
            return Err(ProxyError::AlreadyOnline(name.to_string()));
        }

        let player = PlayerRef::new(new_player_id(), name);
        let session = Session {
            player: player.clone(),
            node: node.to_string(),
            permissions,
            connected_at: timestamp_millis(),
        };
        // a failed directory write leaves no session behind
        self.directory.put(&session.player.name, &session.node).await?;
        self.sessions.insert(player.id.clone(), session.clone());
        self.connect(&session)?;
        info!("{} logged in to {}", player, node);
        Ok(player)
    }

    pub async fn logout(&self, player_id: &str) -> Result<(), ProxyError> {
        let (_, session) = self
            .sessions
            .remove(player_id)
            .ok_or_else(|| ProxyError::UnknownPlayer(player_id.to_string()))?;
        self.directory.remove(&session.player.name).await?;
        self.announce(SessionEvent::Disconnect {
            player: session.player.clone(),
            node: session.node.clone(),
        })?;
        info!("{} logged out of {}", session.player, session.node);
        Ok(())
    }

    /// Moves a session: disconnect from the old node, then connect to the
    /// new one. Returns `false` when the player is already on `node`.
    ///
    /// The session only changes once the directory holds the new node, so a
    /// failed move can be retried.
    pub async fn switch(&self, player_id: &str, node: &str) -> Result<bool, ProxyError> {
        self.check_node(node)?;
        let previous = self
            .session(player_id)
            .ok_or_else(|| ProxyError::UnknownPlayer(player_id.to_string()))?;
        if previous.node == node {
            return Ok(false);
        }

        self.directory.put(&previous.player.name, node).await?;
        let committed = self.sessions.get_mut(player_id).map(|mut session| {
            session.node = node.to_string();
            session.clone()
        });
        let Some(moved) = committed else {
            // logged out while the directory was being written
            self.directory.remove(&previous.player.name).await?;
            return Err(ProxyError::UnknownPlayer(player_id.to_string()));
        };

        self.announce(SessionEvent::Disconnect {
            player: previous.player.clone(),
            node: previous.node.clone(),
        })?;
        self.connect(&moved)?;
        Ok(true)
    }

    /// Forwards a command line typed by `name` to their node.
    pub fn command(&self, name: &str, line: &str) -> Result<(), ProxyError> {
        let session = self.require(name)?;
        self.announce(SessionEvent::Command {
            player: session.player,
            node: session.node,
            line: line.to_string(),
        })
    }

    /// Tells the node of `name` that the player respawned.
    pub fn respawn(&self, name: &str) -> Result<(), ProxyError> {
        let session = self.require(name)?;
        self.announce(SessionEvent::Respawn {
            player: session.player,
            node: session.node,
        })
    }

    /// Case-insensitive session lookup.
    pub fn session_by_name(&self, name: &str) -> Option<Session> {
        let wanted = name_key(name);
        self.sessions
            .iter()
            .find(|s| name_key(&s.player.name) == wanted)
            .map(|s| s.value().clone())
    }

    pub fn session(&self, player_id: &str) -> Option<Session> {
        self.sessions.get(player_id).map(|s| s.value().clone())
    }

    /// All sessions, ordered by name.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by_key(|s| name_key(&s.player.name));
        sessions
    }

    fn require(&self, name: &str) -> Result<Session, ProxyError> {
        self.session_by_name(name)
            .ok_or_else(|| ProxyError::UnknownPlayer(name.to_string()))
    }

    fn check_node(&self, node: &str) -> Result<(), ProxyError> {
        if self.nodes.contains(node) {
            Ok(())
        } else {
            Err(ProxyError::UnknownNode(node.to_string()))
        }
    }

    fn connect(&self, session: &Session) -> Result<(), ProxyError> {
        self.announce(SessionEvent::Connect {
            player: session.player.clone(),
            node: session.node.clone(),
            permissions: session.permissions.clone(),
        })
    }

    fn announce(&self, event: SessionEvent) -> Result<(), ProxyError> {
        debug!("Session event for {} on {}", event.player(), event.node());
        publish_json(&*self.bus, CHANNEL_SESSION, &event)?;
        Ok(())
    }
}

impl SessionRouter for Proxy {
    fn move_player<'a>(&'a self, player_id: &'a str, node: &'a str) -> RouteFuture<'a> {
        Box::pin(self.switch(player_id, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::listen_transfers;
    use shared::{subscribe_json, MemoryBus, MemoryDirectory, ServerTransfer, CHANNEL_SERVER_TRANSFER};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn fleet() -> (Arc<Proxy>, MemoryBus, MemoryDirectory) {
        let bus = MemoryBus::new();
        let directory = MemoryDirectory::new();
        let proxy = Proxy::new(
            ["node1".to_string(), "node2".to_string()],
            Arc::new(bus.clone()),
            Arc::new(directory.clone()),
        );
        (Arc::new(proxy), bus, directory)
    }

    fn record_sessions(bus: &MemoryBus) -> (Arc<Mutex<Vec<SessionEvent>>>, shared::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = subscribe_json(bus, CHANNEL_SESSION, move |event: SessionEvent| {
            sink.lock().unwrap().push(event);
        })
        .unwrap();
        (seen, subscription)
    }

    async fn wait_for(events: &Arc<Mutex<Vec<SessionEvent>>>, count: usize) -> Vec<SessionEvent> {
        for _ in 0..200 {
            if events.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        events.lock().unwrap().clone()
    }

    #[test]
    fn test_player_id_layout() {
        let id = new_player_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_ne!(id, new_player_id());
    }

    #[tokio::test]
    async fn test_start_registers_nodes() {
        let (proxy, _bus, directory) = fleet();
        assert_ok!(proxy.start().await);

        let nodes = directory.nodes().await.unwrap();
        assert!(nodes.contains("node1") && nodes.contains("node2"));
        assert!(directory.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_login_writes_directory_then_connects() {
        let (proxy, bus, directory) = fleet();
        let (events, _recording) = record_sessions(&bus);

        let alice = proxy.login("Alice", "node1", Vec::new()).await.unwrap();

        assert_eq!(directory.node_of("alice").await.unwrap(), Some("node1".to_string()));
        let events = wait_for(&events, 1).await;
        assert_eq!(
            events,
            vec![SessionEvent::Connect {
                player: alice,
                node: "node1".to_string(),
                permissions: Vec::new(),
            }]
        );
    }

    #[tokio::test]
    async fn test_login_rejects_duplicates_and_unknown_nodes() {
        let (proxy, _bus, _directory) = fleet();
        proxy.login("Alice", "node1", Vec::new()).await.unwrap();

        assert!(matches!(
            proxy.login("ALICE", "node2", Vec::new()).await,
            Err(ProxyError::AlreadyOnline(_))
        ));
        assert!(matches!(
            proxy.login("Bob", "node9", Vec::new()).await,
            Err(ProxyError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn test_switch_moves_session() {
        let (proxy, bus, directory) = fleet();
        let alice = proxy.login("Alice", "node1", vec!["admin".to_string()]).await.unwrap();
        let (events, _recording) = record_sessions(&bus);

        assert!(proxy.switch(&alice.id, "node2").await.unwrap());
        assert!(!proxy.switch(&alice.id, "node2").await.unwrap());

        assert_eq!(directory.node_of("Alice").await.unwrap(), Some("node2".to_string()));
        assert_eq!(proxy.session(&alice.id).unwrap().node, "node2");
        let events = wait_for(&events, 2).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].node(), "node1");
        assert!(matches!(events[0], SessionEvent::Disconnect { .. }));
        match &events[1] {
            SessionEvent::Connect { node, permissions, .. } => {
                assert_eq!(node, "node2");
                assert_eq!(permissions, &vec!["admin".to_string()]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_session_and_retries() {
        let (proxy, bus, directory) = fleet();
        let alice = proxy.login("Alice", "node1", Vec::new()).await.unwrap();
        let (events, _recording) = record_sessions(&bus);

        directory.set_available(false);
        assert!(matches!(
            proxy.switch(&alice.id, "node2").await,
            Err(ProxyError::Store(_))
        ));
        assert_eq!(proxy.session(&alice.id).unwrap().node, "node1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.lock().unwrap().is_empty());

        directory.set_available(true);
        assert_eq!(directory.node_of("Alice").await.unwrap(), Some("node1".to_string()));
        assert!(proxy.switch(&alice.id, "node2").await.unwrap());
        assert_eq!(proxy.session(&alice.id).unwrap().node, "node2");
        assert_eq!(directory.node_of("Alice").await.unwrap(), Some("node2".to_string()));
        assert_eq!(wait_for(&events, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_login_can_be_retried() {
        let (proxy, _bus, directory) = fleet();

        directory.set_available(false);
        assert!(proxy.login("Alice", "node1", Vec::new()).await.is_err());
        assert!(proxy.session_by_name("Alice").is_none());

        directory.set_available(true);
        let alice = proxy.login("Alice", "node1", Vec::new()).await.unwrap();
        assert_eq!(proxy.session(&alice.id).unwrap().node, "node1");
        assert_eq!(directory.node_of("alice").await.unwrap(), Some("node1".to_string()));
    }

    #[tokio::test]
    async fn test_logout_and_shutdown_clear_directory() {
        let (proxy, _bus, directory) = fleet();
        let alice = proxy.login("Alice", "node1", Vec::new()).await.unwrap();
        proxy.login("Bob", "node2", Vec::new()).await.unwrap();

        proxy.logout(&alice.id).await.unwrap();
        assert_eq!(directory.node_of("alice").await.unwrap(), None);
        assert!(matches!(
            proxy.logout(&alice.id).await,
            Err(ProxyError::UnknownPlayer(_))
        ));

        proxy.shutdown().await.unwrap();
        assert!(directory.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transfers_from_the_bus() {
        let (proxy, bus, directory) = fleet();
        let alice = proxy.login("Alice", "node1", Vec::new()).await.unwrap();
        let _worker = listen_transfers(&bus, proxy.clone()).unwrap();

        let bogus = ServerTransfer::new("nobody", "node2");
        publish_json(&bus, CHANNEL_SERVER_TRANSFER, &bogus).unwrap();
        let unknown_node = ServerTransfer::new(alice.id.clone(), "node9");
        publish_json(&bus, CHANNEL_SERVER_TRANSFER, &unknown_node).unwrap();
        let transfer = ServerTransfer::new(alice.id.clone(), "node2");
        publish_json(&bus, CHANNEL_SERVER_TRANSFER, &transfer).unwrap();

        for _ in 0..200 {
            if proxy.session(&alice.id).unwrap().node == "node2" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(proxy.session(&alice.id).unwrap().node, "node2");
        assert_eq!(directory.node_of("alice").await.unwrap(), Some("node2".to_string()));
    }

    #[tokio::test]
    async fn test_commands_route_to_the_players_node() {
        let (proxy, bus, _directory) = fleet();
        proxy.login("Bob", "node2", Vec::new()).await.unwrap();
        let (events, _recording) = record_sessions(&bus);

        proxy.command("bob", "/warp hub").unwrap();
        assert!(matches!(proxy.respawn("carol"), Err(ProxyError::UnknownPlayer(_))));

        let events = wait_for(&events, 1).await;
        match &events[0] {
            SessionEvent::Command { node, line, .. } => {
                assert_eq!(node, "node2");
                assert_eq!(line, "/warp hub");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
