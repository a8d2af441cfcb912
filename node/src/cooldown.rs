//! Per-player command cooldowns
//!
//! One timestamp per (command, player) pair. Records never expire; the
//! remaining time is derived from the configured length at read time, so
//! changing the configuration takes effect immediately.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Commands that are subject to a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Warp,
    Spawn,
    RandomTp,
    Tpa,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Warp => "warp",
            CommandKind::Spawn => "spawn",
            CommandKind::RandomTp => "rtp",
            CommandKind::Tpa => "tpa",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last successful use per (command, player). Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct CooldownGate {
    last_use: Arc<DashMap<(CommandKind, String), Instant>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole seconds left before `player_id` may use `kind` again.
    ///
    /// Returns 0 when the cooldown is disabled or the command was never used.
    /// Otherwise `configured_seconds - elapsed_seconds`, clamped at zero.
    pub fn remaining(
        &self,
        player_id: &str,
        kind: CommandKind,
        configured_seconds: u64,
        enabled: bool,
    ) -> u64 {
        if !enabled {
            return 0;
        }
        match self.last_use.get(&(kind, player_id.to_string())) {
            Some(at) => configured_seconds.saturating_sub(at.elapsed().as_secs()),
            None => 0,
        }
    }

    /// Records now as the last use of `kind` by `player_id`.
    pub fn mark(&self, player_id: &str, kind: CommandKind) {
        self.last_use
            .insert((kind, player_id.to_string()), Instant::now());
    }

    pub fn len(&self) -> usize {
        self.last_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_use.is_empty()
    }
}
