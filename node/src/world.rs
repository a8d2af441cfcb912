//! Headless world-mutation context
//!
//! All player and world state lives in a single `WorldState` owned by one
//! task. Everything else reaches it through a `WorldHandle`, which sends a
//! `WorldCommand` and awaits the oneshot reply. This keeps mutation
//! single-threaded while bus handlers and commands run concurrently.
//!
//! Chunk generation is the one expensive step. It runs on the blocking pool
//! and the finished chunk is handed back to the context before the
//! safe-landing scan reads it.

use crate::config::WorldConfig;
use crate::error::TeleportFailure;
use log::{debug, error, info};
use shared::{Location, PlayerRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

pub const CHUNK_SIZE: i32 = 16;

/// Loaded chunks kept before the cache is flushed.
const MAX_LOADED_CHUNKS: usize = 1024;

/// Permission that implies every other one.
pub const ADMIN_PERMISSION: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Air,
    Water,
    Solid(&'static str),
}

/// Read access to block data, the capability the safe-landing scan needs.
pub trait WorldQuery {
    fn min_height(&self) -> i32;

    /// Y of the topmost non-air block in the column.
    fn highest_block_y(&self, x: i32, z: i32) -> i32;

    fn block_at(&self, x: i32, y: i32, z: i32) -> Block;
}

/// Scans the column at (`x`, `z`) from the top down for a block from
/// `safe_blocks` with two blocks of air above it. Returns the Y to stand at.
/// Block names match regardless of case.
pub fn find_safe_y<Q: WorldQuery + ?Sized>(
    world: &Q,
    x: i32,
    z: i32,
    safe_blocks: &[String],
) -> Option<i32> {
    let mut y = world.highest_block_y(x, z);
    while y >= world.min_height() {
        if let Block::Solid(name) = world.block_at(x, y, z) {
            if safe_blocks.iter().any(|safe| safe.eq_ignore_ascii_case(name))
                && world.block_at(x, y + 1, z) == Block::Air
                && world.block_at(x, y + 2, z) == Block::Air
            {
                return Some(y + 1);
            }
        }
        y -= 1;
    }
    None
}

/// Deterministic column generator for one named world.
#[derive(Debug, Clone)]
pub struct Terrain {
    pub name: String,
    seed: u64,
    min_height: i32,
    base_height: i32,
    amplitude: i32,
    sea_level: Option<i32>,
}

impl Terrain {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            name: config.name.clone(),
            seed: config.seed,
            min_height: config.min_height,
            base_height: config.base_height,
            amplitude: config.amplitude.max(0),
            sea_level: config.sea_level,
        }
    }

    pub fn ground_height(&self, x: i32, z: i32) -> i32 {
        let span = self.amplitude as u64 + 1;
        self.base_height + (column_noise(self.seed, x, z) % span) as i32
    }

    /// Builds the chunk containing chunk coordinates (`cx`, `cz`).
    pub fn generate_chunk(&self, cx: i32, cz: i32) -> Chunk {
        let mut heights = vec![0; (CHUNK_SIZE * CHUNK_SIZE) as usize];
        for dx in 0..CHUNK_SIZE {
            for dz in 0..CHUNK_SIZE {
                heights[(dx * CHUNK_SIZE + dz) as usize] =
                    self.ground_height(cx * CHUNK_SIZE + dx, cz * CHUNK_SIZE + dz);
            }
        }
        Chunk {
            cx,
            cz,
            heights,
            min_height: self.min_height,
            sea_level: self.sea_level,
        }
    }

    /// Standing position on top of the column.
    pub fn surface(&self, x: i32, z: i32) -> Location {
        let chunk = self.generate_chunk(chunk_coord(x), chunk_coord(z));
        let y = chunk.highest_block_y(x, z) + 1;
        Location::new(self.name.clone(), x as f64 + 0.5, y as f64, z as f64 + 0.5)
    }
}

fn column_noise(seed: u64, x: i32, z: i32) -> u64 {
    let mut h = seed
        ^ (x as i64 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (z as i64 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    h ^ (h >> 33)
}

pub fn chunk_coord(block: i32) -> i32 {
    block.div_euclid(CHUNK_SIZE)
}

/// Generated block data for one 16x16 column group.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub cx: i32,
    pub cz: i32,
    heights: Vec<i32>,
    min_height: i32,
    sea_level: Option<i32>,
}

impl Chunk {
    fn ground(&self, x: i32, z: i32) -> i32 {
        let dx = x.rem_euclid(CHUNK_SIZE);
        let dz = z.rem_euclid(CHUNK_SIZE);
        self.heights[(dx * CHUNK_SIZE + dz) as usize]
    }

    fn flooded(&self, y: i32) -> bool {
        self.sea_level.map_or(false, |sea| y <= sea)
    }
}

impl WorldQuery for Chunk {
    fn min_height(&self) -> i32 {
        self.min_height
    }

    fn highest_block_y(&self, x: i32, z: i32) -> i32 {
        let ground = self.ground(x, z);
        match self.sea_level {
            Some(sea) if sea > ground => sea,
            _ => ground,
        }
    }

    fn block_at(&self, x: i32, y: i32, z: i32) -> Block {
        let ground = self.ground(x, z);
        if y < self.min_height {
            Block::Air
        } else if y == self.min_height {
            Block::Solid("BEDROCK")
        } else if y == ground {
            if self.flooded(ground + 1) {
                Block::Solid("SAND")
            } else {
                Block::Solid("GRASS_BLOCK")
            }
        } else if y < ground {
            if y >= ground - 3 {
                Block::Solid("DIRT")
            } else {
                Block::Solid("STONE")
            }
        } else if self.flooded(y) {
            Block::Water
        } else {
            Block::Air
        }
    }
}

/// A player currently on this node.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlinePlayer {
    pub player: PlayerRef,
    pub location: Location,
    /// Where the player appeared when they connected
    pub joined_at: Location,
    pub permissions: HashSet<String>,
}

impl OnlinePlayer {
    pub fn id(&self) -> &str {
        &self.player.id
    }

    pub fn name(&self) -> &str {
        &self.player.name
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission) || self.permissions.contains(ADMIN_PERMISSION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeleportOutcome {
    Done,
    UnknownPlayer,
    UnknownWorld,
}

/// Requests marshaled onto the world context.
#[derive(Debug)]
enum WorldCommand {
    Join {
        player: PlayerRef,
        location: Option<Location>,
        permissions: HashSet<String>,
        reply: oneshot::Sender<Location>,
    },
    Leave {
        player_id: String,
        reply: oneshot::Sender<Option<OnlinePlayer>>,
    },
    ById {
        player_id: String,
        reply: oneshot::Sender<Option<OnlinePlayer>>,
    },
    ByName {
        name: String,
        reply: oneshot::Sender<Option<OnlinePlayer>>,
    },
    Online {
        reply: oneshot::Sender<Vec<OnlinePlayer>>,
    },
    Teleport {
        player_id: String,
        location: Location,
        reply: oneshot::Sender<TeleportOutcome>,
    },
    Tell {
        player_id: String,
        text: String,
    },
    HasWorld {
        world: String,
        reply: oneshot::Sender<bool>,
    },
    Terrain {
        world: String,
        reply: oneshot::Sender<Option<Arc<Terrain>>>,
    },
    ChunkLoaded {
        world: String,
        cx: i32,
        cz: i32,
        reply: oneshot::Sender<bool>,
    },
    InstallChunk {
        world: String,
        chunk: Chunk,
        reply: oneshot::Sender<()>,
    },
    ScanColumn {
        world: String,
        x: i32,
        z: i32,
        safe_blocks: Vec<String>,
        reply: oneshot::Sender<Option<i32>>,
    },
    Transcript {
        player_id: String,
        reply: oneshot::Sender<Vec<String>>,
    },
}

struct WorldState {
    worlds: HashMap<String, Arc<Terrain>>,
    chunks: HashMap<(String, i32, i32), Chunk>,
    players: HashMap<String, OnlinePlayer>,
    /// Every message sent to a player, kept across reconnects
    transcripts: HashMap<String, Vec<String>>,
    default_spawn: Location,
}

impl WorldState {
    fn new(configs: &[WorldConfig], default_world: &str) -> Self {
        let worlds: HashMap<String, Arc<Terrain>> = configs
            .iter()
            .map(|config| (config.name.clone(), Arc::new(Terrain::new(config))))
            .collect();

        let default_spawn = worlds
            .get(default_world)
            .or_else(|| configs.first().and_then(|c| worlds.get(&c.name)))
            .map(|terrain| terrain.surface(0, 0))
            .unwrap_or_else(|| Location::new(default_world, 0.5, 64.0, 0.5));

        Self {
            worlds,
            chunks: HashMap::new(),
            players: HashMap::new(),
            transcripts: HashMap::new(),
            default_spawn,
        }
    }

    fn apply(&mut self, command: WorldCommand) {
        match command {
            WorldCommand::Join {
                player,
                location,
                permissions,
                reply,
            } => {
                let location = location.unwrap_or_else(|| self.default_spawn.clone());
                info!("{} joined at {}", player, location);
                self.players.insert(
                    player.id.clone(),
                    OnlinePlayer {
                        player,
                        location: location.clone(),
                        joined_at: location.clone(),
                        permissions,
                    },
                );
                let _ = reply.send(location);
            }
            WorldCommand::Leave { player_id, reply } => {
                let left = self.players.remove(&player_id);
                if let Some(ref p) = left {
                    info!("{} left", p.player);
                }
                let _ = reply.send(left);
            }
            WorldCommand::ById { player_id, reply } => {
                let _ = reply.send(self.players.get(&player_id).cloned());
            }
            WorldCommand::ByName { name, reply } => {
                let found = self
                    .players
                    .values()
                    .find(|p| p.player.has_name(&name))
                    .cloned();
                let _ = reply.send(found);
            }
            WorldCommand::Online { reply } => {
                let _ = reply.send(self.players.values().cloned().collect());
            }
            WorldCommand::Teleport {
                player_id,
                location,
                reply,
            } => {
                let outcome = if !self.worlds.contains_key(&location.world) {
                    TeleportOutcome::UnknownWorld
                } else if let Some(player) = self.players.get_mut(&player_id) {
                    debug!("Moving {} to {}", player.player, location);
                    player.location = location;
                    TeleportOutcome::Done
                } else {
                    TeleportOutcome::UnknownPlayer
                };
                let _ = reply.send(outcome);
            }
            WorldCommand::Tell { player_id, text } => {
                match self.players.get(&player_id) {
                    Some(p) => info!("[to {}] {}", p.player, text),
                    None => debug!("[to offline {}] {}", player_id, text),
                }
                self.transcripts.entry(player_id).or_default().push(text);
            }
            WorldCommand::HasWorld { world, reply } => {
                let _ = reply.send(self.worlds.contains_key(&world));
            }
            WorldCommand::Terrain { world, reply } => {
                let _ = reply.send(self.worlds.get(&world).cloned());
            }
            WorldCommand::ChunkLoaded {
                world,
                cx,
                cz,
                reply,
            } => {
                let _ = reply.send(self.chunks.contains_key(&(world, cx, cz)));
            }
            WorldCommand::InstallChunk {
                world,
                chunk,
                reply,
            } => {
                if self.chunks.len() >= MAX_LOADED_CHUNKS {
                    debug!("Flushing {} loaded chunks", self.chunks.len());
                    self.chunks.clear();
                }
                self.chunks.insert((world, chunk.cx, chunk.cz), chunk);
                let _ = reply.send(());
            }
            WorldCommand::ScanColumn {
                world,
                x,
                z,
                safe_blocks,
                reply,
            } => {
                let key = (world, chunk_coord(x), chunk_coord(z));
                let y = self
                    .chunks
                    .get(&key)
                    .and_then(|chunk| find_safe_y(chunk, x, z, &safe_blocks));
                let _ = reply.send(y);
            }
            WorldCommand::Transcript { player_id, reply } => {
                let lines = self.transcripts.get(&player_id).cloned().unwrap_or_default();
                let _ = reply.send(lines);
            }
        }
    }
}

async fn run_world(mut state: WorldState, mut commands: mpsc::UnboundedReceiver<WorldCommand>) {
    let mut status = interval(Duration::from_secs(60));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => state.apply(command),
                None => break,
            },
            _ = status.tick() => {
                debug!(
                    "World status: {} players online, {} chunks loaded",
                    state.players.len(),
                    state.chunks.len()
                );
            }
        }
    }
    info!("World context stopped");
}

/// Cloneable access to the world context.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    commands: mpsc::UnboundedSender<WorldCommand>,
}

impl WorldHandle {
    /// Starts the world context task. Must be called inside a tokio runtime.
    pub fn spawn(configs: &[WorldConfig], default_world: &str) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let state = WorldState::new(configs, default_world);
        tokio::spawn(run_world(state, rx));
        WorldHandle { commands }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> WorldCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(build(tx)).is_err() {
            error!("World context is gone");
            return None;
        }
        rx.await.ok()
    }

    /// Places a connecting player, at `location` or at the default spawn.
    pub async fn join(
        &self,
        player: PlayerRef,
        location: Option<Location>,
        permissions: HashSet<String>,
    ) -> Result<Location, TeleportFailure> {
        self.call(|reply| WorldCommand::Join {
            player,
            location,
            permissions,
            reply,
        })
        .await
        .ok_or(TeleportFailure::WorldStopped)
    }

    pub async fn leave(&self, player_id: &str) -> Option<OnlinePlayer> {
        self.call(|reply| WorldCommand::Leave {
            player_id: player_id.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    pub async fn player_by_id(&self, player_id: &str) -> Option<OnlinePlayer> {
        self.call(|reply| WorldCommand::ById {
            player_id: player_id.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    /// Case-insensitive name lookup.
    pub async fn player_by_name(&self, name: &str) -> Option<OnlinePlayer> {
        self.call(|reply| WorldCommand::ByName {
            name: name.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    pub async fn online(&self) -> Vec<OnlinePlayer> {
        self.call(|reply| WorldCommand::Online { reply })
            .await
            .unwrap_or_default()
    }

    /// Moves a player. Resolves once the move is applied.
    pub async fn teleport(&self, player_id: &str, location: Location) -> Result<(), TeleportFailure> {
        let world = location.world.clone();
        let outcome = self
            .call(|reply| WorldCommand::Teleport {
                player_id: player_id.to_string(),
                location,
                reply,
            })
            .await
            .ok_or(TeleportFailure::WorldStopped)?;

        match outcome {
            TeleportOutcome::Done => Ok(()),
            TeleportOutcome::UnknownWorld => Err(TeleportFailure::WorldNotFound(world)),
            TeleportOutcome::UnknownPlayer => Err(TeleportFailure::NotPresent(player_id.to_string())),
        }
    }

    /// Sends a chat line to a player.
    pub fn tell(&self, player_id: &str, text: impl Into<String>) {
        let command = WorldCommand::Tell {
            player_id: player_id.to_string(),
            text: text.into(),
        };
        if let Err(e) = self.commands.send(command) {
            error!("Failed to queue message for {}: {}", player_id, e);
        }
    }

    pub async fn has_world(&self, world: &str) -> bool {
        self.call(|reply| WorldCommand::HasWorld {
            world: world.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Finds where a player can stand in the column (`x`, `z`) of `world`.
    ///
    /// Loads the chunk off the world context when needed, then runs the
    /// column scan on the context.
    pub async fn safe_landing(
        &self,
        world: &str,
        x: i32,
        z: i32,
        safe_blocks: &[String],
    ) -> Result<Location, TeleportFailure> {
        let terrain = self
            .call(|reply| WorldCommand::Terrain {
                world: world.to_string(),
                reply,
            })
            .await
            .ok_or(TeleportFailure::WorldStopped)?
            .ok_or_else(|| TeleportFailure::WorldNotFound(world.to_string()))?;

        let (cx, cz) = (chunk_coord(x), chunk_coord(z));
        let loaded = self
            .call(|reply| WorldCommand::ChunkLoaded {
                world: world.to_string(),
                cx,
                cz,
                reply,
            })
            .await
            .ok_or(TeleportFailure::WorldStopped)?;

        if !loaded {
            debug!("Loading chunk {},{} of {}", cx, cz, world);
            let chunk = tokio::task::spawn_blocking(move || terrain.generate_chunk(cx, cz))
                .await
                .map_err(|e| {
                    error!("Chunk generation failed: {}", e);
                    TeleportFailure::NoSafeLocation { x, z }
                })?;
            self.call(|reply| WorldCommand::InstallChunk {
                world: world.to_string(),
                chunk,
                reply,
            })
            .await
            .ok_or(TeleportFailure::WorldStopped)?;
        }

        let y = self
            .call(|reply| WorldCommand::ScanColumn {
                world: world.to_string(),
                x,
                z,
                safe_blocks: safe_blocks.to_vec(),
                reply,
            })
            .await
            .ok_or(TeleportFailure::WorldStopped)?;

        match y {
            Some(y) => Ok(Location::new(world, x as f64 + 0.5, y as f64, z as f64 + 0.5)),
            None => Err(TeleportFailure::NoSafeLocation { x, z }),
        }
    }

    /// Every message sent to the player on this node.
    pub async fn transcript(&self, player_id: &str) -> Vec<String> {
        self.call(|reply| WorldCommand::Transcript {
            player_id: player_id.to_string(),
            reply,
        })
        .await
        .unwrap_or_default()
    }
}
