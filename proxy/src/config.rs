//! Proxy configuration: where the hub is and which nodes exist.

use crate::error::ConfigError;
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};
use shared::hub::DEFAULT_HUB_ADDR;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub hub: String,
    /// Node names registered in the directory at startup
    pub nodes: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hub: DEFAULT_HUB_ADDR.to_string(),
            nodes: vec!["lobby".to_string()],
        }
    }
}

impl ProxyConfig {
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
        if let Some(ref hub) = args.hub {
            self.hub = hub.clone();
        }
        if !args.nodes.is_empty() {
            self.nodes = args.nodes.clone();
        }
    }
}

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[clap(author, version, about = "Session front end for a teleport fleet")]
pub struct CliArgs {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "proxy.toml")]
    pub config: PathBuf,
    /// Hub address, overrides the config file
    #[clap(long)]
    pub hub: Option<String>,
    /// Node to register; repeat for several. Replaces the configured list
    #[clap(short, long = "node")]
    pub nodes: Vec<String>,
}
