//! Hub wire protocol and remote client
//!
//! The hub is the fleet's shared backing service: one directory and one
//! pub/sub fan-out. Frames are newline-delimited JSON over TCP.
//!
//! - Clients send `HubRequest { id, op }`.
//! - The hub answers every request with `HubFrame::Reply` carrying the same
//!   id, and pushes `HubFrame::Message` for channels the client subscribed to.
//!
//! `RemoteHub` implements both `MessageBus` and `DirectoryStore` on top of a
//! single connection. Once the connection drops, every pending and future
//! call fails with `StoreError::Unavailable`.

use crate::bus::{Handler, MemoryBus, MessageBus, Subscription};
use crate::directory::{DirectoryStore, StoreFuture};
use crate::error::StoreError;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Default wait for the reply to a directory call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:6380";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HubOp {
    Ping,
    Publish { channel: String, payload: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    SetAll { players: HashMap<String, String> },
    Put { name: String, node: String },
    Remove { name: String },
    All,
    NodeOf { name: String },
    SetNodes { nodes: Vec<String> },
    Nodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRequest {
    pub id: u64,
    pub op: HubOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HubResult {
    Done,
    Node { node: Option<String> },
    Players { players: HashMap<String, String> },
    Nodes { nodes: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum HubFrame {
    Reply { id: u64, result: HubResult },
    Message { channel: String, payload: String },
}

struct RemoteInner {
    addr: String,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<HubResult>>,
    /// Local fan-out of pushed messages to this process' subscribers
    local: MemoryBus,
    /// Local subscriber count per channel
    channels: DashMap<String, usize>,
    connected: AtomicBool,
    request_timeout: Duration,
}

impl RemoteInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queues a request whose reply nobody waits for.
    fn send(&self, op: HubOp) -> Result<(), StoreError> {
        self.send_with(self.next_id(), op)
    }

    fn send_with(&self, id: u64, op: HubOp) -> Result<(), StoreError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(StoreError::unavailable(format!("hub {} disconnected", self.addr)));
        }
        let line = serde_json::to_string(&HubRequest { id, op })?;
        self.outgoing
            .send(line)
            .map_err(|_| StoreError::unavailable(format!("hub {} writer stopped", self.addr)))
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!("Lost connection to hub {}", self.addr);
        }
        // dropping the senders wakes every waiter with an error
        self.pending.clear();
        self.local.close();
    }

    fn release_channel(&self, channel: &str) {
        let last = match self.channels.get_mut(channel) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if last {
            self.channels.remove(channel);
            if let Err(e) = self.send(HubOp::Unsubscribe {
                channel: channel.to_string(),
            }) {
                debug!("Could not unsubscribe from '{}': {}", channel, e);
            }
        }
    }
}

/// Connection to a hub, usable as both bus and directory.
#[derive(Clone)]
pub struct RemoteHub {
    inner: Arc<RemoteInner>,
}

impl RemoteHub {
    /// Connects and verifies the hub answers a ping.
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeout(addr, REQUEST_TIMEOUT).await
    }

    /// Like `connect`, with a custom wait for each reply.
    pub async fn connect_with_timeout(
        addr: &str,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| StoreError::unavailable(format!("connect {}: {}", addr, e)))?;
        let (read_half, mut write_half) = stream.into_split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        let inner = Arc::new(RemoteInner {
            addr: addr.to_string(),
            outgoing,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            local: MemoryBus::new(),
            channels: DashMap::new(),
            connected: AtomicBool::new(true),
            request_timeout,
        });

        // Tasks hold weak references so dropping every handle closes the connection
        let writer_state = Arc::downgrade(&inner);
        let writer_addr = addr.to_string();
        tokio::spawn(async move {
            while let Some(mut line) = outgoing_rx.recv().await {
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    error!("Failed to write to hub {}: {}", writer_addr, e);
                    break;
                }
            }
            if let Some(inner) = writer_state.upgrade() {
                inner.mark_disconnected();
            }
        });

        let reader_state = Arc::downgrade(&inner);
        let reader_addr = addr.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading from hub {}: {}", reader_addr, e);
                        break;
                    }
                };
                let Some(inner) = reader_state.upgrade() else {
                    break;
                };
                match serde_json::from_str::<HubFrame>(&line) {
                    Ok(HubFrame::Reply { id, result }) => {
                        if let Some((_, waiter)) = inner.pending.remove(&id) {
                            let _ = waiter.send(result);
                        }
                    }
                    Ok(HubFrame::Message { channel, payload }) => {
                        if let Err(e) = inner.local.publish(&channel, payload) {
                            debug!("Dropping message for '{}': {}", channel, e);
                        }
                    }
                    Err(e) => warn!("Failed to decode hub frame from {}: {}", reader_addr, e),
                }
            }
            if let Some(inner) = reader_state.upgrade() {
                inner.mark_disconnected();
            }
        });

        let hub = RemoteHub { inner };
        hub.ping().await?;
        info!("Connected to hub {}", addr);
        Ok(hub)
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.call(HubOp::Ping).await.map(|_| ())
    }

    async fn call(&self, op: HubOp) -> Result<HubResult, StoreError> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id();
        // register before sending so a fast reply is never missed
        self.inner.pending.insert(id, tx);
        if let Err(e) = self.inner.send_with(id, op) {
            self.inner.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(HubResult::Failed { message })) => Err(StoreError::Unavailable(message)),
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(StoreError::unavailable(format!(
                "hub {} closed the connection",
                self.inner.addr
            ))),
            Err(_) => {
                // a late reply finds no waiter and is dropped
                self.inner.pending.remove(&id);
                Err(StoreError::unavailable(format!(
                    "hub {} did not answer within {:?}",
                    self.inner.addr, self.inner.request_timeout
                )))
            }
        }
    }

    async fn call_done(&self, op: HubOp) -> Result<(), StoreError> {
        match self.call(op).await? {
            HubResult::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(result: HubResult) -> StoreError {
    StoreError::unavailable(format!("unexpected hub reply: {:?}", result))
}

impl MessageBus for RemoteHub {
    fn publish(&self, channel: &str, payload: String) -> Result<(), StoreError> {
        self.inner.send(HubOp::Publish {
            channel: channel.to_string(),
            payload,
        })
    }

    fn subscribe(&self, channel: &str, handler: Handler) -> Result<Subscription, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::unavailable(format!(
                "hub {} disconnected",
                self.inner.addr
            )));
        }
        let local = self.inner.local.subscribe(channel, handler)?;

        let first = {
            let mut count = self.inner.channels.entry(channel.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.inner.send(HubOp::Subscribe {
                channel: channel.to_string(),
            })?;
        }

        let inner = Arc::clone(&self.inner);
        let name = channel.to_string();
        Ok(local.and_then(move || inner.release_channel(&name)))
    }
}

impl DirectoryStore for RemoteHub {
    fn set_all<'a>(&'a self, players: HashMap<String, String>) -> StoreFuture<'a, ()> {
        Box::pin(self.call_done(HubOp::SetAll { players }))
    }

    fn put<'a>(&'a self, name: &'a str, node: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.call_done(HubOp::Put {
            name: name.to_string(),
            node: node.to_string(),
        }))
    }

    fn remove<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.call_done(HubOp::Remove {
            name: name.to_string(),
        }))
    }

    fn all<'a>(&'a self) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            match self.call(HubOp::All).await? {
                HubResult::Players { players } => Ok(players),
                other => Err(unexpected(other)),
            }
        })
    }

    fn node_of<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            match self
                .call(HubOp::NodeOf {
                    name: name.to_string(),
                })
                .await?
            {
                HubResult::Node { node } => Ok(node),
                other => Err(unexpected(other)),
            }
        })
    }

    fn set_nodes<'a>(&'a self, nodes: HashSet<String>) -> StoreFuture<'a, ()> {
        Box::pin(self.call_done(HubOp::SetNodes {
            nodes: nodes.into_iter().collect(),
        }))
    }

    fn nodes<'a>(&'a self) -> StoreFuture<'a, HashSet<String>> {
        Box::pin(async move {
            match self.call(HubOp::Nodes).await? {
                HubResult::Nodes { nodes } => Ok(nodes.into_iter().collect()),
                other => Err(unexpected(other)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = HubRequest {
            id: 9,
            op: HubOp::Put {
                name: "Alice".to_string(),
                node: "node1".to_string(),
            },
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["id"], 9);
        assert_eq!(value["op"]["op"], "put");
        assert_eq!(value["op"]["name"], "Alice");
    }

    #[test]
    fn test_frames_decode() {
        let reply: HubFrame =
            serde_json::from_str(r#"{"frame":"reply","id":3,"result":{"status":"node","node":null}}"#)
                .unwrap();
        assert_eq!(
            reply,
            HubFrame::Reply {
                id: 3,
                result: HubResult::Node { node: None }
            }
        );

        let message: HubFrame = serde_json::from_str(
            r#"{"frame":"message","channel":"teleport","payload":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(message, HubFrame::Message { .. }));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = RemoteHub::connect(&addr).await;
        match result {
            Err(e) => assert!(e.is_unavailable()),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    /// Answers the first request (the connect ping), then goes silent.
    async fn answer_once(listener: tokio::net::TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        let request: HubRequest = serde_json::from_str(&first).unwrap();
        let reply = HubFrame::Reply {
            id: request.id,
            result: HubResult::Done,
        };
        let mut line = serde_json::to_string(&reply).unwrap();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.unwrap();

        while let Ok(Some(_)) = lines.next_line().await {}
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out_and_forgets_waiter() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(answer_once(listener));

        let hub = RemoteHub::connect_with_timeout(&addr, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(hub.inner.pending.is_empty());

        for _ in 0..3 {
            let err = hub.node_of("Alice").await.unwrap_err();
            assert!(err.is_unavailable());
        }
        assert!(hub.inner.pending.is_empty());
        // the connection itself is still up
        assert!(hub.is_connected());
    }
}
