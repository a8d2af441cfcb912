//! Publish/subscribe message bus
//!
//! Channels are named and carry JSON text. Publishing is fire-and-forget:
//! `publish` only queues the payload. Each subscription owns a delivery task
//! that invokes its handler once per message, in publish order for a single
//! publisher, with no ordering relative to other channels.
//!
//! Dropping (or explicitly unsubscribing) a `Subscription` stops new
//! deliveries; messages already queued for it still reach the handler.

use crate::error::StoreError;
use dashmap::DashMap;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const CHANNEL_TELEPORT: &str = "teleport";
pub const CHANNEL_SERVER_TRANSFER: &str = "server-transfer";
pub const CHANNEL_SESSION: &str = "session";

/// Callback run for every payload received on a channel.
pub type Handler = Arc<dyn Fn(String) + Send + Sync>;

pub trait MessageBus: Send + Sync {
    /// Queues `payload` for every current subscriber of `channel`.
    fn publish(&self, channel: &str, payload: String) -> Result<(), StoreError>;

    /// Registers `handler` for `channel`. Must be called inside a tokio runtime.
    fn subscribe(&self, channel: &str, handler: Handler) -> Result<Subscription, StoreError>;
}

/// Handle to an active subscription. Unsubscribes when dropped.
pub struct Subscription {
    channel: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Runs `extra` after the subscription's own release.
    pub fn and_then(mut self, extra: impl FnOnce() + Send + 'static) -> Self {
        let inner = self.release.take();
        let channel = std::mem::take(&mut self.channel);
        Subscription::new(channel, move || {
            if let Some(release) = inner {
                release();
            }
            extra();
        })
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("Unsubscribing from '{}'", self.channel);
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Serializes `message` as JSON and publishes it.
pub fn publish_json<T: Serialize>(
    bus: &dyn MessageBus,
    channel: &str,
    message: &T,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(message)?;
    bus.publish(channel, payload)
}

/// Subscribes with a typed handler. Payloads that fail to decode are logged
/// and dropped; the subscription keeps running.
pub fn subscribe_json<T, F>(
    bus: &dyn MessageBus,
    channel: &str,
    on_message: F,
) -> Result<Subscription, StoreError>
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    let channel_name = channel.to_string();
    bus.subscribe(
        channel,
        Arc::new(move |payload: String| match serde_json::from_str::<T>(&payload) {
            Ok(message) => on_message(message),
            Err(e) => warn!(
                "Dropping malformed payload on '{}': {} ({})",
                channel_name, e, payload
            ),
        }),
    )
}

/// Spawns the task that feeds queued payloads to `handler` until the
/// sending half is dropped.
pub(crate) fn spawn_delivery(
    channel: String,
    mut rx: mpsc::UnboundedReceiver<String>,
    handler: Handler,
) {
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            handler(payload);
        }
        debug!("Delivery task for '{}' finished", channel);
    });
}

type Subscribers = Vec<(u64, mpsc::UnboundedSender<String>)>;

struct MemoryBusInner {
    channels: DashMap<String, Subscribers>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// In-process bus. Clones share the same channels.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryBusInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Adds a raw receiver to `channel`. Returns its id for `detach`.
    pub fn attach(
        &self,
        channel: &str,
    ) -> Result<(u64, mpsc::UnboundedReceiver<String>), StoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("bus closed"));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        Ok((id, rx))
    }

    pub fn detach(&self, channel: &str, id: u64) {
        if let Some(mut subscribers) = self.inner.channels.get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
        self.inner
            .channels
            .remove_if(channel, |_, subscribers| subscribers.is_empty());
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Drops every subscriber and rejects further use.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.channels.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, channel: &str, payload: String) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::unavailable("bus closed"));
        }
        if let Some(mut subscribers) = self.inner.channels.get_mut(channel) {
            subscribers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str, handler: Handler) -> Result<Subscription, StoreError> {
        let (id, rx) = self.attach(channel)?;
        spawn_delivery(channel.to_string(), rx, handler);

        let bus = self.clone();
        let name = channel.to_string();
        Ok(Subscription::new(channel, move || bus.detach(&name, id)))
    }
}
