//! Node configuration
//!
//! Loaded from a TOML file where every section and field is optional, then
//! overridden by command line flags.

use crate::cooldown::CommandKind;
use crate::messages::Messages;
use crate::warps::WarpRecord;
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};
use shared::hub::DEFAULT_HUB_ADDR;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name this node is registered under in the directory
    pub server_name: String,
    /// Address of the hub
    pub hub: String,
    pub random_tp: RandomTpConfig,
    pub tpa: TpaConfig,
    pub cooldown: CooldownConfig,
    pub messages: Messages,
    pub worlds: Vec<WorldConfig>,
    pub warps: Vec<WarpRecord>,
    pub spawn: Option<WarpRecord>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_name: "lobby".to_string(),
            hub: DEFAULT_HUB_ADDR.to_string(),
            random_tp: RandomTpConfig::default(),
            tpa: TpaConfig::default(),
            cooldown: CooldownConfig::default(),
            messages: Messages::default(),
            worlds: vec![WorldConfig::default()],
            warps: Vec::new(),
            spawn: None,
        }
    }
}

impl NodeConfig {
    /// Builds the default config for the node called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            server_name: name.into(),
            ..Self::default()
        }
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref name) = args.name {
            self.server_name = name.clone();
        }
        if let Some(ref hub) = args.hub {
            self.hub = hub.clone();
        }
        if let Some(seconds) = args.tpa_expire_seconds {
            self.tpa.expire_seconds = seconds;
        }
    }

    pub fn default_world(&self) -> &str {
        &self.random_tp.default_world
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomTpConfig {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
    pub default_world: String,
    /// Block names a player may land on
    pub safe_blocks: Vec<String>,
    /// Nodes that refuse random teleports
    pub disabled_servers: Vec<String>,
}

impl Default for RandomTpConfig {
    fn default() -> Self {
        Self {
            min_x: -5000,
            max_x: 5000,
            min_z: -5000,
            max_z: 5000,
            default_world: "world".to_string(),
            safe_blocks: [
                "GRASS_BLOCK",
                "DIRT",
                "STONE",
                "SAND",
                "GRAVEL",
                "SANDSTONE",
                "COARSE_DIRT",
                "PODZOL",
            ]
            .iter()
            .map(|b| b.to_string())
            .collect(),
            disabled_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpaConfig {
    pub enabled: bool,
    /// Lifetime of a request ticket
    pub expire_seconds: u64,
    /// Interval of the expired-ticket sweep
    pub sweep_seconds: u64,
    pub disabled_servers: Vec<String>,
}

impl Default for TpaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expire_seconds: 60,
            sweep_seconds: 10,
            disabled_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownRule {
    pub enabled: bool,
    pub seconds: u64,
    pub bypass_permission: String,
}

impl CooldownRule {
    fn new(seconds: u64, bypass: &str) -> Self {
        Self {
            enabled: true,
            seconds,
            bypass_permission: bypass.to_string(),
        }
    }
}

impl Default for CooldownRule {
    fn default() -> Self {
        Self::new(0, "cooldown.bypass")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub warp: CooldownRule,
    pub spawn: CooldownRule,
    pub rtp: CooldownRule,
    pub tpa: CooldownRule,
}

impl CooldownConfig {
    pub fn rule(&self, kind: CommandKind) -> &CooldownRule {
        match kind {
            CommandKind::Warp => &self.warp,
            CommandKind::Spawn => &self.spawn,
            CommandKind::RandomTp => &self.rtp,
            CommandKind::Tpa => &self.tpa,
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            warp: CooldownRule::new(5, "cooldown.bypass.warp"),
            spawn: CooldownRule::new(3, "cooldown.bypass.spawn"),
            rtp: CooldownRule::new(30, "cooldown.bypass.rtp"),
            tpa: CooldownRule::new(10, "cooldown.bypass.tpa"),
        }
    }
}

/// A named world of the headless world context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub name: String,
    pub seed: u64,
    pub min_height: i32,
    pub base_height: i32,
    /// Maximum rise of the ground above `base_height`
    pub amplitude: i32,
    /// Columns whose ground is below this level are flooded
    pub sea_level: Option<i32>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            seed: 0,
            min_height: -64,
            base_height: 64,
            amplitude: 12,
            sea_level: None,
        }
    }
}

/// Command line arguments. Values given here override the config file.
#[derive(Parser, Debug, Default)]
#[clap(author, version, about = "Teleport-coordinating game node")]
pub struct CliArgs {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "node.toml")]
    pub config: PathBuf,
    /// Node name registered in the directory
    #[clap(short, long)]
    pub name: Option<String>,
    /// Hub address (host:port)
    #[clap(long)]
    pub hub: Option<String>,
    /// Lifetime of TPA requests in seconds
    #[clap(long)]
    pub tpa_expire_seconds: Option<u64>,
}
