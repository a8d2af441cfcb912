//! Hub TCP service
//!
//! Hosts one `MemoryDirectory` and one `MemoryBus` for the whole fleet.
//! Each client connection gets a reader loop that executes requests in
//! order and a writer task fed by an mpsc queue, so pushed channel messages
//! and replies never interleave mid-line.

use log::{debug, error, info, warn};
use shared::bus::{MemoryBus, MessageBus, Subscription};
use shared::directory::{DirectoryStore, MemoryDirectory};
use shared::hub::{HubFrame, HubOp, HubRequest, HubResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long a closing session waits for its queued frames to be written.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

pub struct HubServer {
    listener: TcpListener,
    bus: MemoryBus,
    directory: MemoryDirectory,
    shutdown_tx: watch::Sender<bool>,
}

impl HubServer {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Hub listening on {}", listener.local_addr()?);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(HubServer {
            listener,
            bus: MemoryBus::new(),
            directory: MemoryDirectory::new(),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn directory(&self) -> &MemoryDirectory {
        &self.directory
    }

    /// Runs the accept loop on a background task.
    pub fn spawn(self) -> std::io::Result<HubHandle> {
        let addr = self.local_addr()?;
        let shutdown_tx = self.shutdown_tx.clone();
        let task = tokio::spawn(self.run());
        Ok(HubHandle {
            addr,
            shutdown_tx,
            task,
        })
    }

    /// Accepts clients until shutdown is signalled.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Hub client connected from {}", peer);
                        let session = ClientSession {
                            peer,
                            bus: self.bus.clone(),
                            directory: self.directory.clone(),
                        };
                        let shutdown = self.shutdown_tx.subscribe();
                        tokio::spawn(session.serve(stream, shutdown));
                    }
                    Err(e) => {
                        error!("Failed to accept hub client: {}", e);
                    }
                },
                _ = shutdown_rx.changed() => {
                    info!("Hub shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle to a hub running in the background.
pub struct HubHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HubHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting and closes every client connection.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Hub task panicked: {}", e);
        }
    }
}

struct ClientSession {
    peer: SocketAddr,
    bus: MemoryBus,
    directory: MemoryDirectory,
}

impl ClientSession {
    async fn serve(self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let (read_half, mut write_half) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<HubFrame>();

        let peer = self.peer;
        let mut writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let mut line = match serde_json::to_string(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to encode frame for {}: {}", peer, e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!("Write to {} failed: {}", peer, e);
                    break;
                }
            }
        });

        let mut subscriptions: HashMap<String, Subscription> = HashMap::new();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = shutdown.changed() => break,
            };

            match line {
                Ok(Some(line)) => {
                    let request = match serde_json::from_str::<HubRequest>(&line) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("Failed to decode request from {}: {}", self.peer, e);
                            continue;
                        }
                    };
                    let result = self.execute(request.op, &mut subscriptions, &frame_tx).await;
                    if frame_tx
                        .send(HubFrame::Reply {
                            id: request.id,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading from {}: {}", self.peer, e);
                    break;
                }
            }
        }

        // releases this client's channels
        drop(subscriptions);
        drop(frame_tx);
        // let queued replies and messages reach the client
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            warn!("Writer for {} did not drain in time", self.peer);
            writer.abort();
        }
        info!("Hub client {} disconnected", self.peer);
    }

    async fn execute(
        &self,
        op: HubOp,
        subscriptions: &mut HashMap<String, Subscription>,
        frames: &mpsc::UnboundedSender<HubFrame>,
    ) -> HubResult {
        let outcome = match op {
            HubOp::Ping => Ok(HubResult::Done),
            HubOp::Publish { channel, payload } => {
                self.bus.publish(&channel, payload).map(|_| HubResult::Done)
            }
            HubOp::Subscribe { channel } => {
                if subscriptions.contains_key(&channel) {
                    Ok(HubResult::Done)
                } else {
                    let frames = frames.clone();
                    let name = channel.clone();
                    self.bus
                        .subscribe(
                            &channel,
                            Arc::new(move |payload: String| {
                                let _ = frames.send(HubFrame::Message {
                                    channel: name.clone(),
                                    payload,
                                });
                            }),
                        )
                        .map(|subscription| {
                            debug!("{} subscribed to '{}'", self.peer, channel);
                            subscriptions.insert(channel, subscription);
                            HubResult::Done
                        })
                }
            }
            HubOp::Unsubscribe { channel } => {
                subscriptions.remove(&channel);
                Ok(HubResult::Done)
            }
            HubOp::SetAll { players } => {
                self.directory.set_all(players).await.map(|_| HubResult::Done)
            }
            HubOp::Put { name, node } => self
                .directory
                .put(&name, &node)
                .await
                .map(|_| HubResult::Done),
            HubOp::Remove { name } => self.directory.remove(&name).await.map(|_| HubResult::Done),
            HubOp::All => self
                .directory
                .all()
                .await
                .map(|players| HubResult::Players { players }),
            HubOp::NodeOf { name } => self
                .directory
                .node_of(&name)
                .await
                .map(|node| HubResult::Node { node }),
            HubOp::SetNodes { nodes } => self
                .directory
                .set_nodes(nodes.into_iter().collect())
                .await
                .map(|_| HubResult::Done),
            HubOp::Nodes => self.directory.nodes().await.map(|nodes| {
                let mut nodes: Vec<String> = nodes.into_iter().collect();
                nodes.sort();
                HubResult::Nodes { nodes }
            }),
        };

        outcome.unwrap_or_else(|e| HubResult::Failed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_test::assert_ok;

    fn session() -> ClientSession {
        ClientSession {
            peer: "127.0.0.1:9".parse().unwrap(),
            bus: MemoryBus::new(),
            directory: MemoryDirectory::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_directory_ops() {
        let session = session();
        let mut subs = HashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let put = HubOp::Put {
            name: "Carol".to_string(),
            node: "node2".to_string(),
        };
        assert_eq!(session.execute(put, &mut subs, &tx).await, HubResult::Done);

        let lookup = HubOp::NodeOf {
            name: "CAROL".to_string(),
        };
        assert_eq!(
            session.execute(lookup, &mut subs, &tx).await,
            HubResult::Node {
                node: Some("node2".to_string())
            }
        );

        let nodes = HubOp::SetNodes {
            nodes: vec!["b".to_string(), "a".to_string()],
        };
        session.execute(nodes, &mut subs, &tx).await;
        assert_eq!(
            session.execute(HubOp::Nodes, &mut subs, &tx).await,
            HubResult::Nodes {
                nodes: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_subscribe_pushes_messages() {
        let session = session();
        let mut subs = HashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscribe = HubOp::Subscribe {
            channel: "teleport".to_string(),
        };
        session.execute(subscribe.clone(), &mut subs, &tx).await;
        // a repeated subscribe does not double deliveries
        session.execute(subscribe, &mut subs, &tx).await;
        assert_eq!(session.bus.subscriber_count("teleport"), 1);

        let publish = HubOp::Publish {
            channel: "teleport".to_string(),
            payload: "{}".to_string(),
        };
        session.execute(publish, &mut subs, &tx).await;

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            HubFrame::Message {
                channel: "teleport".to_string(),
                payload: "{}".to_string()
            }
        );

        let unsubscribe = HubOp::Unsubscribe {
            channel: "teleport".to_string(),
        };
        session.execute(unsubscribe, &mut subs, &tx).await;
        assert_eq!(session.bus.subscriber_count("teleport"), 0);
    }

    #[tokio::test]
    async fn test_offline_directory_reports_failure() {
        let session = session();
        session.directory.set_available(false);
        let mut subs = HashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = session.execute(HubOp::All, &mut subs, &tx).await;
        assert!(matches!(result, HubResult::Failed { .. }));

        session.directory.set_available(true);
        let nodes: HashSet<String> = HashSet::new();
        assert_eq!(
            session
                .execute(
                    HubOp::SetNodes {
                        nodes: nodes.into_iter().collect()
                    },
                    &mut subs,
                    &tx
                )
                .await,
            HubResult::Done
        );
    }

    #[tokio::test]
    async fn test_spawn_on_ephemeral_port() {
        let server = assert_ok!(HubServer::bind("127.0.0.1:0").await);
        let addr = assert_ok!(server.local_addr());
        assert_ne!(addr.port(), 0);

        let handle = assert_ok!(server.spawn());
        assert_eq!(handle.addr(), addr);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_replies_are_flushed_when_client_hangs_up() {
        let handle = assert_ok!(HubServer::bind("127.0.0.1:0").await).spawn().unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let mut batch = String::new();
        for id in 0..200u64 {
            let request = HubRequest { id, op: HubOp::Ping };
            batch.push_str(&serde_json::to_string(&request).unwrap());
            batch.push('\n');
        }
        stream.write_all(batch.as_bytes()).await.unwrap();
        // closing our half ends the session right after the last request
        stream.shutdown().await.unwrap();

        let mut lines = BufReader::new(stream).lines();
        let mut replies = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            let frame: HubFrame = serde_json::from_str(&line).unwrap();
            assert!(matches!(frame, HubFrame::Reply { result: HubResult::Done, .. }));
            replies += 1;
        }
        assert_eq!(replies, 200);

        handle.shutdown().await;
    }
}
