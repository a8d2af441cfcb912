//! Node coordinator
//!
//! Owns the per-node state (pending teleports, request tickets, cooldowns)
//! and the event loop that drains everything arriving for this node:
//! teleport intents from the bus, session events from the proxy tier and
//! commands queued through the API. Events are handled one at a time, in
//! arrival order.

use crate::commands;
use crate::config::{NodeConfig, RandomTpConfig};
use crate::cooldown::CooldownGate;
use crate::error::TeleportFailure;
use crate::handshake;
use crate::messages::{coord, fill, Messages};
use crate::pending::PendingTeleports;
use crate::tickets::TicketStore;
use crate::warps::{WarpCatalog, WarpRecord};
use crate::world::{OnlinePlayer, WorldHandle};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{
    find_player, publish_json, subscribe_json, Action, Column, DirectoryEntry, DirectoryStore,
    Location, MessageBus, PlayerRef, ServerTransfer, SessionEvent, StoreError, Subscription,
    TeleportIntent, TpaStep, CHANNEL_SERVER_TRANSFER, CHANNEL_SESSION, CHANNEL_TELEPORT,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};

/// Everything the event loop feeds on
#[derive(Debug)]
pub enum NodeEvent {
    Intent(TeleportIntent),
    Session(SessionEvent),
    Shutdown,
}

/// State and backends of one node, shared by the event loop, the ticket
/// sweeper and every `NodeHandle`.
pub struct NodeContext {
    pub(crate) name: String,
    pub(crate) config: NodeConfig,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) directory: Arc<dyn DirectoryStore>,
    pub(crate) warps: Arc<dyn WarpCatalog>,
    pub(crate) world: WorldHandle,
    pub(crate) pending: PendingTeleports,
    pub(crate) tickets: TicketStore,
    pub(crate) cooldowns: CooldownGate,
}

/// Where a connecting player should appear and what they are told once
/// they are in.
#[derive(Debug, Default)]
struct Arrival {
    location: Option<Location>,
    notices: Vec<String>,
}

impl Arrival {
    fn notice(text: String) -> Self {
        Arrival {
            location: None,
            notices: vec![text],
        }
    }
}

impl NodeContext {
    pub fn messages(&self) -> &Messages {
        &self.config.messages
    }

    /// Publishes an intent. Bus failures are logged; the flow that sent it
    /// simply never completes.
    pub(crate) fn publish_intent(&self, intent: &TeleportIntent) {
        debug!(
            "Publishing {} intent for {} to {}",
            intent.kind(),
            intent.player,
            intent.destination
        );
        if let Err(e) = publish_json(&*self.bus, CHANNEL_TELEPORT, intent) {
            error!("Failed to publish {} intent for {}: {}", intent.kind(), intent.player, e);
        }
    }

    /// Asks the proxy tier to move `player_id` to `node`.
    pub(crate) fn request_transfer(&self, player_id: &str, node: &str) {
        let transfer = ServerTransfer::new(player_id, node);
        if let Err(e) = publish_json(&*self.bus, CHANNEL_SERVER_TRANSFER, &transfer) {
            error!("Failed to request transfer of {} to {}: {}", player_id, node, e);
        }
    }

    /// Publishes `intent` for its destination, then moves the player there.
    pub(crate) fn send_across(&self, intent: TeleportIntent) {
        self.publish_intent(&intent);
        self.request_transfer(&intent.player.id, &intent.destination);
    }

    pub(crate) fn tell(&self, player_id: &str, text: impl Into<String>) {
        self.world.tell(player_id, text);
    }

    /// Finds which node hosts `name`. A directory outage reads as "not online".
    pub(crate) async fn lookup(&self, name: &str) -> Option<DirectoryEntry> {
        match find_player(&*self.directory, name).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Directory lookup for {} failed: {}", name, e);
                None
            }
        }
    }

    /// Whether `node` is part of the network. A directory outage reads as no.
    pub(crate) async fn knows_node(&self, node: &str) -> bool {
        match self.directory.nodes().await {
            Ok(nodes) => nodes.contains(node),
            Err(e) => {
                warn!("Directory node listing failed: {}", e);
                false
            }
        }
    }

    /// Tells the player why something failed and hands the failure back.
    pub(crate) fn report(
        &self,
        player_id: &str,
        result: Result<(), TeleportFailure>,
    ) -> Result<(), TeleportFailure> {
        if let Err(ref failure) = result {
            debug!("Teleport for {} failed: {}", player_id, failure);
            self.tell(player_id, failure.render(self.messages()));
        }
        result
    }

    pub(crate) fn random_column(&self) -> Column {
        random_column(&self.config.random_tp)
    }

    /// Resolves a safe landing in `world` (or the default world), at
    /// `column` or at a freshly generated one.
    pub(crate) async fn random_landing(
        &self,
        world: Option<&str>,
        column: Option<Column>,
    ) -> Result<Location, TeleportFailure> {
        let world = world.unwrap_or_else(|| self.config.default_world());
        let column = column.unwrap_or_else(|| self.random_column());
        self.world
            .safe_landing(world, column.x, column.z, &self.config.random_tp.safe_blocks)
            .await
    }

    pub(crate) fn landing_notices(&self, location: &Location) -> Vec<String> {
        let messages = &self.messages().random_tp;
        vec![
            messages.completed.clone(),
            fill(
                &messages.location,
                &[
                    ("world", location.world.clone()),
                    ("x", coord(location.x)),
                    ("y", coord(location.y)),
                    ("z", coord(location.z)),
                ],
            ),
        ]
    }

    async fn handle_intent(&self, intent: TeleportIntent) {
        if !intent.is_for(&self.name) {
            return;
        }
        debug!("Received {} intent for {}", intent.kind(), intent.player);

        if let Action::Tpa { ref step } = intent.action {
            handshake::on_step(self, &intent, step).await;
            return;
        }

        match self.world.player_by_id(&intent.player.id).await {
            Some(player) => {
                let result = self.apply_direct(&player, &intent).await;
                let _ = self.report(player.id(), result);
            }
            None => {
                let player_id = intent.player.id.clone();
                self.pending.admit(&player_id, intent);
            }
        }
    }

    /// Applies a warp, spawn or random intent to a player already here.
    async fn apply_direct(
        &self,
        player: &OnlinePlayer,
        intent: &TeleportIntent,
    ) -> Result<(), TeleportFailure> {
        match &intent.action {
            Action::Warp { warp, location } => {
                self.world.teleport(player.id(), location.clone()).await?;
                self.tell(
                    player.id(),
                    fill(&self.messages().warp.teleported, &[("name", warp.clone())]),
                );
            }
            Action::ToSpawn { location } => {
                self.world.teleport(player.id(), location.clone()).await?;
                self.tell(player.id(), self.messages().spawn.teleported.clone());
            }
            Action::RandomTeleport { world, column } => {
                let landing = self.random_landing(world.as_deref(), *column).await?;
                self.world.teleport(player.id(), landing.clone()).await?;
                for line in self.landing_notices(&landing) {
                    self.tell(player.id(), line);
                }
            }
            Action::Tpa { .. } => {}
        }
        Ok(())
    }

    async fn handle_session(&self, event: SessionEvent) {
        if event.node() != self.name {
            return;
        }
        match event {
            SessionEvent::Connect {
                player,
                permissions,
                ..
            } => self.handle_connect(player, permissions).await,
            SessionEvent::Disconnect { player, .. } => {
                if self.world.leave(&player.id).await.is_some() {
                    info!("{} left {}", player, self.name);
                }
            }
            SessionEvent::Command { player, line, .. } => {
                match self.world.player_by_id(&player.id).await {
                    Some(online) => commands::execute(self, &online, &line).await,
                    None => warn!("Command from {} who is not on {}", player, self.name),
                }
            }
            SessionEvent::Respawn { player, .. } => {
                if let Some(online) = self.world.player_by_id(&player.id).await {
                    let result = commands::respawn(self, &online).await;
                    let _ = self.report(online.id(), result);
                }
            }
        }
    }

    /// Consumes any pending teleport before the player is placed, so the
    /// join position already reflects it.
    async fn handle_connect(&self, player: PlayerRef, permissions: Vec<String>) {
        let arrival = match self.pending.take_if_present(&player.id) {
            Some(intent) => {
                debug!("Applying pending {} for {}", intent.kind(), player);
                self.resolve_arrival(&intent).await
            }
            None => Arrival::default(),
        };

        let permissions: HashSet<String> = permissions.into_iter().collect();
        match self.world.join(player.clone(), arrival.location, permissions).await {
            Ok(location) => {
                info!("{} joined {} at {}", player, self.name, location);
                for line in arrival.notices {
                    self.tell(&player.id, line);
                }
            }
            Err(e) => error!("Failed to place {}: {}", player, e),
        }
    }

    async fn resolve_arrival(&self, intent: &TeleportIntent) -> Arrival {
        let messages = self.messages();
        match &intent.action {
            Action::Warp { warp, location } => {
                let notice = fill(&messages.warp.teleported, &[("name", warp.clone())]);
                self.arrive_at(location, notice).await
            }
            Action::ToSpawn { location } => {
                self.arrive_at(location, messages.spawn.teleported.clone()).await
            }
            Action::RandomTeleport { world, column } => {
                match self.random_landing(world.as_deref(), *column).await {
                    Ok(landing) => Arrival {
                        notices: self.landing_notices(&landing),
                        location: Some(landing),
                    },
                    Err(failure) => Arrival::notice(failure.render(messages)),
                }
            }
            Action::Tpa { step } => match step {
                TpaStep::Arrive { location, anchor } => {
                    let notice = fill(&messages.tpa.teleported, &[("player", anchor.clone())]);
                    self.arrive_at(location, notice).await
                }
                TpaStep::PrepareTeleport { target, .. } => {
                    match self.world.player_by_name(target).await {
                        Some(anchor) => Arrival {
                            location: Some(anchor.location),
                            notices: vec![fill(
                                &messages.tpa.teleported,
                                &[("player", anchor.player.name)],
                            )],
                        },
                        None => Arrival::notice(
                            TeleportFailure::PlayerNotFound(target.clone()).render(messages),
                        ),
                    }
                }
                TpaStep::PrepareTeleportCoords { location, .. } => {
                    let notice = fill(&messages.tpa.teleported, &[("player", location.to_string())]);
                    self.arrive_at(location, notice).await
                }
                other => {
                    warn!("Ignoring pending {} step for {}", other.name(), intent.player);
                    Arrival::default()
                }
            },
        }
    }

    async fn arrive_at(&self, location: &Location, notice: String) -> Arrival {
        if self.world.has_world(&location.world).await {
            Arrival {
                location: Some(location.clone()),
                notices: vec![notice],
            }
        } else {
            Arrival::notice(TeleportFailure::WorldNotFound(location.world.clone()).render(self.messages()))
        }
    }
}

/// Picks a column inside the configured range. Inverted bounds are swapped.
pub fn random_column(config: &RandomTpConfig) -> Column {
    let mut rng = rand::thread_rng();
    let (min_x, max_x) = ordered(config.min_x, config.max_x);
    let (min_z, max_z) = ordered(config.min_z, config.max_z);
    Column {
        x: rng.gen_range(min_x..=max_x),
        z: rng.gen_range(min_z..=max_z),
    }
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A node that has not started yet.
pub struct Node {
    ctx: Arc<NodeContext>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
}

impl Node {
    /// Builds the node and starts its world context. Must be called inside
    /// a tokio runtime.
    pub fn new(
        config: NodeConfig,
        bus: Arc<dyn MessageBus>,
        directory: Arc<dyn DirectoryStore>,
        warps: Arc<dyn WarpCatalog>,
    ) -> Self {
        let world = WorldHandle::spawn(&config.worlds, config.default_world());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = NodeContext {
            name: config.server_name.clone(),
            config,
            bus,
            directory,
            warps,
            world,
            pending: PendingTeleports::new(),
            tickets: TicketStore::new(),
            cooldowns: CooldownGate::new(),
        };
        Node {
            ctx: Arc::new(ctx),
            events_tx,
            events_rx,
        }
    }

    /// Subscribes to the bus and starts the event loop.
    ///
    /// The directory must be reachable at startup; later outages only
    /// degrade lookups.
    pub async fn start(self) -> Result<NodeHandle, StoreError> {
        let Node {
            ctx,
            events_tx,
            events_rx,
        } = self;

        let nodes = ctx.directory.nodes().await?;
        if !nodes.contains(&ctx.name) {
            warn!(
                "Node {} is not registered in the directory yet; transfers to it will fail",
                ctx.name
            );
        }

        let subscriptions = vec![
            subscribe_teleports(&ctx, events_tx.clone())?,
            subscribe_sessions(&ctx, events_tx.clone())?,
        ];
        let sweeper = spawn_ticket_sweeper(Arc::clone(&ctx));
        tokio::spawn(run(Arc::clone(&ctx), events_rx, subscriptions, sweeper));

        info!("Node {} started", ctx.name);
        Ok(NodeHandle {
            ctx,
            events: events_tx,
        })
    }
}

fn subscribe_teleports(
    ctx: &NodeContext,
    events: mpsc::UnboundedSender<NodeEvent>,
) -> Result<Subscription, StoreError> {
    let name = ctx.name.clone();
    subscribe_json(&*ctx.bus, CHANNEL_TELEPORT, move |intent: TeleportIntent| {
        if !intent.is_for(&name) {
            return;
        }
        if let Err(e) = events.send(NodeEvent::Intent(intent)) {
            error!("Failed to queue intent on {}: {}", name, e);
        }
    })
}

fn subscribe_sessions(
    ctx: &NodeContext,
    events: mpsc::UnboundedSender<NodeEvent>,
) -> Result<Subscription, StoreError> {
    let name = ctx.name.clone();
    subscribe_json(&*ctx.bus, CHANNEL_SESSION, move |event: SessionEvent| {
        if event.node() != name {
            return;
        }
        if let Err(e) = events.send(NodeEvent::Session(event)) {
            error!("Failed to queue session event on {}: {}", name, e);
        }
    })
}

/// Drops expired request tickets every `sweep_seconds`.
fn spawn_ticket_sweeper(ctx: Arc<NodeContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(ctx.config.tpa.sweep_seconds.max(1));
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = ctx.tickets.sweep(Instant::now());
            if removed > 0 {
                debug!("Swept {} expired requests on {}", removed, ctx.name);
            }
        }
    })
}

async fn run(
    ctx: Arc<NodeContext>,
    mut events: mpsc::UnboundedReceiver<NodeEvent>,
    subscriptions: Vec<Subscription>,
    sweeper: JoinHandle<()>,
) {
    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Intent(intent) => ctx.handle_intent(intent).await,
            NodeEvent::Session(event) => ctx.handle_session(event).await,
            NodeEvent::Shutdown => {
                info!("Node {} shutting down", ctx.name);
                break;
            }
        }
    }
    drop(subscriptions);
    sweeper.abort();
}

/// Cloneable API onto a running node.
#[derive(Clone)]
pub struct NodeHandle {
    ctx: Arc<NodeContext>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeHandle {
    pub fn server_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.ctx.config
    }

    pub fn world(&self) -> &WorldHandle {
        &self.ctx.world
    }

    pub fn warp(&self, name: &str) -> Option<WarpRecord> {
        self.ctx.warps.get(name)
    }

    pub fn warps(&self) -> Vec<WarpRecord> {
        self.ctx.warps.all()
    }

    pub fn spawn_point(&self) -> Option<WarpRecord> {
        self.ctx.warps.spawn()
    }

    /// Number of teleports waiting for their player to connect.
    pub fn pending_teleports(&self) -> usize {
        self.ctx.pending.len()
    }

    /// Number of request tickets waiting for an answer.
    pub fn open_requests(&self) -> usize {
        self.ctx.tickets.len()
    }

    pub async fn player(&self, name: &str) -> Option<OnlinePlayer> {
        self.ctx.world.player_by_name(name).await
    }

    pub async fn transcript(&self, player_id: &str) -> Vec<String> {
        self.ctx.world.transcript(player_id).await
    }

    /// Queues a command line as if the player had typed it.
    pub fn run_command(&self, player: PlayerRef, line: impl Into<String>) {
        let event = SessionEvent::Command {
            player,
            node: self.ctx.name.clone(),
            line: line.into(),
        };
        if let Err(e) = self.events.send(NodeEvent::Session(event)) {
            error!("Failed to queue command on {}: {}", self.ctx.name, e);
        }
    }

    /// Sends a player on this node to a warp, without cooldown or
    /// permission checks.
    pub async fn warp_player(&self, player_id: &str, warp: &str) -> Result<(), TeleportFailure> {
        let player = self.online(player_id).await?;
        let result = commands::warp(&self.ctx, &player, warp).await;
        self.ctx.report(player_id, result)
    }

    /// Random teleport on `node` (this node when `None`), in `world` or the
    /// destination's default world.
    pub async fn random_teleport(
        &self,
        player_id: &str,
        node: Option<&str>,
        world: Option<&str>,
    ) -> Result<(), TeleportFailure> {
        let player = self.online(player_id).await?;
        let result = commands::random_teleport(&self.ctx, &player, node, world).await;
        self.ctx.report(player_id, result)
    }

    /// Moves a player on this node next to `target`, wherever they are.
    pub async fn teleport_to_player(
        &self,
        player_id: &str,
        target: &str,
    ) -> Result<(), TeleportFailure> {
        let player = self.online(player_id).await?;
        let result = commands::teleport_to_player(&self.ctx, &player, target).await;
        self.ctx.report(player_id, result)
    }

    pub async fn teleport_to_location(
        &self,
        player_id: &str,
        node: &str,
        location: Location,
    ) -> Result<(), TeleportFailure> {
        let player = self.online(player_id).await?;
        let result = commands::teleport_to_location(&self.ctx, &player, node, location).await;
        self.ctx.report(player_id, result)
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.events.send(NodeEvent::Shutdown) {
            debug!("Node {} already stopped: {}", self.ctx.name, e);
        }
    }

    async fn online(&self, player_id: &str) -> Result<OnlinePlayer, TeleportFailure> {
        self.ctx
            .world
            .player_by_id(player_id)
            .await
            .ok_or_else(|| TeleportFailure::NotPresent(player_id.to_string()))
    }
}
