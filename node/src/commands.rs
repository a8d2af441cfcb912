//! Player commands
//!
//! Parses command lines typed by players and runs them against the node.
//! The action functions here carry no cooldown or permission checks; those
//! are applied by `execute` so the API can reuse the actions unchecked.

use crate::coordinator::NodeContext;
use crate::cooldown::CommandKind;
use crate::error::TeleportFailure;
use crate::handshake;
use crate::messages::{coord, fill, Messages};
use crate::warps::WarpRecord;
use crate::world::OnlinePlayer;
use log::debug;
use shared::{Location, TeleportIntent, TpaStep};
use std::future::Future;
use thiserror::Error;

pub const PERMISSION_SET_WARP: &str = "warp.set";
pub const PERMISSION_DELETE_WARP: &str = "warp.delete";
pub const PERMISSION_SET_SPAWN: &str = "spawn.set";
pub const PERMISSION_TELEPORT_OTHERS: &str = "teleport.direct";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Warp(String),
    Warps,
    SetWarp(String),
    DelWarp(String),
    Spawn,
    SetSpawn,
    /// Random teleport, optionally on another node
    RandomTp(Option<String>),
    Tpa(String),
    TpaHere(String),
    TpAccept,
    TpDeny,
    /// Direct teleport next to a player anywhere in the network
    TpTo(String),
    /// Direct teleport to coordinates on a node
    TpPos { node: String, location: Location },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,
    #[error("unknown command {0}")]
    Unknown(String),
    #[error("wrong arguments for {0}")]
    Usage(&'static str),
}

impl ParseError {
    pub fn render(&self, messages: &Messages) -> String {
        match self {
            ParseError::Empty => fill(&messages.unknown_command, &[("command", String::new())]),
            ParseError::Unknown(command) => {
                fill(&messages.unknown_command, &[("command", command.clone())])
            }
            ParseError::Usage(command) => match *command {
                "warp" => messages.warp.usage.clone(),
                "setwarp" => messages.warp.usage_set.clone(),
                "delwarp" => messages.warp.usage_delete.clone(),
                "tpahere" => messages.tpa.here_usage.clone(),
                "tpto" => messages.tpa.to_usage.clone(),
                "tppos" => messages.tpa.pos_usage.clone(),
                _ => messages.tpa.usage.clone(),
            },
        }
    }
}

impl Command {
    /// Parses a line such as `/warp hub`. The leading slash is optional and
    /// the command name is case-insensitive.
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let mut parts = line.trim().trim_start_matches('/').split_whitespace();
        let name = parts.next().ok_or(ParseError::Empty)?.to_lowercase();
        let args: Vec<&str> = parts.collect();
        let first = |usage: &'static str| {
            args.first()
                .map(|arg| arg.to_string())
                .ok_or(ParseError::Usage(usage))
        };

        match name.as_str() {
            "warp" => Ok(Command::Warp(first("warp")?)),
            "warps" => Ok(Command::Warps),
            "setwarp" => Ok(Command::SetWarp(first("setwarp")?)),
            "delwarp" => Ok(Command::DelWarp(first("delwarp")?)),
            "spawn" => Ok(Command::Spawn),
            "setspawn" => Ok(Command::SetSpawn),
            "rtp" | "randomtp" | "wild" => {
                Ok(Command::RandomTp(args.first().map(|arg| arg.to_string())))
            }
            "tpa" => Ok(Command::Tpa(first("tpa")?)),
            "tpahere" => Ok(Command::TpaHere(first("tpahere")?)),
            "tpaccept" | "tpyes" => Ok(Command::TpAccept),
            "tpdeny" | "tpno" => Ok(Command::TpDeny),
            "tpto" => Ok(Command::TpTo(first("tpto")?)),
            "tppos" => parse_position(&args).map(|(node, location)| Command::TpPos { node, location }),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_position(args: &[&str]) -> Result<(String, Location), ParseError> {
    let [node, world, x, y, z] = args else {
        return Err(ParseError::Usage("tppos"));
    };
    let number = |text: &str| text.parse::<f64>().map_err(|_| ParseError::Usage("tppos"));
    Ok((
        node.to_string(),
        Location::new(*world, number(*x)?, number(*y)?, number(*z)?),
    ))
}

/// Runs a command line for `player`, telling them about any failure.
pub async fn execute(ctx: &NodeContext, player: &OnlinePlayer, line: &str) {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            debug!("{} sent an invalid command '{}': {}", player.player, line, e);
            ctx.tell(player.id(), e.render(ctx.messages()));
            return;
        }
    };
    debug!("{} runs {:?} on {}", player.player, command, ctx.name);

    let result = match command {
        Command::Warp(name) => gated(ctx, player, CommandKind::Warp, warp(ctx, player, &name)).await,
        Command::Warps => {
            list_warps(ctx, player);
            Ok(())
        }
        Command::SetWarp(name) => permitted(player, PERMISSION_SET_WARP, ctx)
            .map(|()| set_warp(ctx, player, &name)),
        Command::DelWarp(name) => {
            permitted(player, PERMISSION_DELETE_WARP, ctx).and_then(|()| delete_warp(ctx, player, &name))
        }
        Command::Spawn => gated(ctx, player, CommandKind::Spawn, spawn(ctx, player)).await,
        Command::SetSpawn => {
            permitted(player, PERMISSION_SET_SPAWN, ctx).map(|()| set_spawn(ctx, player))
        }
        Command::RandomTp(node) => {
            let action = random_teleport(ctx, player, node.as_deref(), None);
            gated(ctx, player, CommandKind::RandomTp, action).await
        }
        Command::Tpa(target) => {
            let action = handshake::request(ctx, player, &target, false);
            gated(ctx, player, CommandKind::Tpa, action).await
        }
        Command::TpaHere(target) => {
            let action = handshake::request(ctx, player, &target, true);
            gated(ctx, player, CommandKind::Tpa, action).await
        }
        Command::TpAccept => handshake::accept(ctx, player).await,
        Command::TpDeny => handshake::deny(ctx, player).await,
        Command::TpTo(target) => match permitted(player, PERMISSION_TELEPORT_OTHERS, ctx) {
            Ok(()) => teleport_to_player(ctx, player, &target).await,
            Err(e) => Err(e),
        },
        Command::TpPos { node, location } => match permitted(player, PERMISSION_TELEPORT_OTHERS, ctx) {
            Ok(()) => teleport_to_location(ctx, player, &node, location).await,
            Err(e) => Err(e),
        },
    };
    let _ = ctx.report(player.id(), result);
}

fn permitted(player: &OnlinePlayer, permission: &str, ctx: &NodeContext) -> Result<(), TeleportFailure> {
    if player.has_permission(permission) {
        Ok(())
    } else {
        Err(TeleportFailure::Refused(ctx.messages().no_permission.clone()))
    }
}

/// Runs `action` unless the player is still cooling down from the last
/// use of `kind`; starts a new cooldown when it succeeds.
async fn gated(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    kind: CommandKind,
    action: impl Future<Output = Result<(), TeleportFailure>>,
) -> Result<(), TeleportFailure> {
    let rule = ctx.config.cooldown.rule(kind);
    if !player.has_permission(&rule.bypass_permission) {
        let remaining = ctx
            .cooldowns
            .remaining(player.id(), kind, rule.seconds, rule.enabled);
        if remaining > 0 {
            return Err(TeleportFailure::Refused(fill(
                &ctx.messages().cooldown,
                &[("seconds", remaining.to_string())],
            )));
        }
    }
    action.await?;
    ctx.cooldowns.mark(player.id(), kind);
    Ok(())
}

fn place(location: &Location) -> [(&'static str, String); 4] {
    [
        ("world", location.world.clone()),
        ("x", coord(location.x)),
        ("y", coord(location.y)),
        ("z", coord(location.z)),
    ]
}

/// Teleports to a warp, moving the player to the warp's node when needed.
pub(crate) async fn warp(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    name: &str,
) -> Result<(), TeleportFailure> {
    let messages = &ctx.messages().warp;
    let record = ctx.warps.get(name).ok_or_else(|| {
        TeleportFailure::Refused(fill(&messages.not_found, &[("name", name.to_string())]))
    })?;

    if record.node == ctx.name {
        ctx.world.teleport(player.id(), record.location).await?;
        ctx.tell(
            player.id(),
            fill(&messages.teleported, &[("name", record.name)]),
        );
        return Ok(());
    }

    ensure_node(ctx, &record.node).await?;
    ctx.tell(
        player.id(),
        fill(
            &messages.teleporting,
            &[("name", record.name.clone()), ("server", record.node.clone())],
        ),
    );
    ctx.send_across(TeleportIntent::warp(
        player.player.clone(),
        record.node,
        record.name,
        record.location,
    ));
    Ok(())
}

pub(crate) async fn spawn(ctx: &NodeContext, player: &OnlinePlayer) -> Result<(), TeleportFailure> {
    let messages = &ctx.messages().spawn;
    let record = ctx
        .warps
        .spawn()
        .ok_or_else(|| TeleportFailure::Refused(messages.not_set.clone()))?;

    if record.node == ctx.name {
        ctx.world.teleport(player.id(), record.location).await?;
        ctx.tell(player.id(), messages.teleported.clone());
        return Ok(());
    }

    ensure_node(ctx, &record.node).await?;
    ctx.tell(
        player.id(),
        fill(&messages.teleporting, &[("server", record.node.clone())]),
    );
    ctx.send_across(TeleportIntent::to_spawn(
        player.player.clone(),
        record.node,
        record.location,
    ));
    Ok(())
}

/// Returns a player to spawn after death. Without a spawn point the
/// player stays where the node put them.
pub(crate) async fn respawn(ctx: &NodeContext, player: &OnlinePlayer) -> Result<(), TeleportFailure> {
    let Some(record) = ctx.warps.spawn() else {
        return Ok(());
    };

    if record.node == ctx.name {
        ctx.world.teleport(player.id(), record.location).await?;
        ctx.tell(player.id(), ctx.messages().spawn.respawn.clone());
    } else {
        ctx.send_across(TeleportIntent::to_spawn(
            player.player.clone(),
            record.node,
            record.location,
        ));
    }
    Ok(())
}

fn list_warps(ctx: &NodeContext, player: &OnlinePlayer) {
    let messages = &ctx.messages().warp;
    let warps = ctx.warps.all();
    if warps.is_empty() {
        ctx.tell(player.id(), messages.list_empty.clone());
        return;
    }
    ctx.tell(player.id(), messages.list_header.clone());
    for warp in warps {
        let mut vars = place(&warp.location).to_vec();
        vars.push(("name", warp.name));
        vars.push(("server", warp.node));
        ctx.tell(player.id(), fill(&messages.list_entry, &vars));
    }
}

fn set_warp(ctx: &NodeContext, player: &OnlinePlayer, name: &str) {
    let location = player.location.clone();
    let mut vars = place(&location).to_vec();
    vars.push(("name", name.to_string()));
    ctx.warps
        .set(WarpRecord::new(name, ctx.name.clone(), location));
    ctx.tell(player.id(), fill(&ctx.messages().warp.set, &vars));
}

fn delete_warp(ctx: &NodeContext, player: &OnlinePlayer, name: &str) -> Result<(), TeleportFailure> {
    let messages = &ctx.messages().warp;
    let vars = [("name", name.to_string())];
    if !ctx.warps.delete(name) {
        return Err(TeleportFailure::Refused(fill(&messages.not_found, &vars)));
    }
    ctx.tell(player.id(), fill(&messages.deleted, &vars));
    Ok(())
}

fn set_spawn(ctx: &NodeContext, player: &OnlinePlayer) {
    let location = player.location.clone();
    let text = fill(&ctx.messages().spawn.set, &place(&location));
    ctx.warps.set_spawn(&ctx.name, location);
    ctx.tell(player.id(), text);
}

/// Random teleport on `node` (this node when `None`).
///
/// Locally the column is generated and resolved here. For another node only
/// the intent travels; the destination generates the coordinates.
pub(crate) async fn random_teleport(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    node: Option<&str>,
    world: Option<&str>,
) -> Result<(), TeleportFailure> {
    let messages = &ctx.messages().random_tp;
    let target = node.unwrap_or(ctx.name.as_str()).to_string();
    if ctx.config.random_tp.disabled_servers.contains(&target) {
        return Err(TeleportFailure::Refused(fill(
            &messages.disabled,
            &[("server", target)],
        )));
    }

    if target == ctx.name {
        let world = world.unwrap_or_else(|| ctx.config.default_world());
        if !ctx.world.has_world(world).await {
            return Err(TeleportFailure::WorldNotFound(world.to_string()));
        }
        let column = ctx.random_column();
        ctx.tell(
            player.id(),
            fill(&messages.teleporting, &[("server", target.clone())]),
        );
        ctx.tell(
            player.id(),
            fill(
                &messages.coordinates,
                &[("x", column.x.to_string()), ("z", column.z.to_string())],
            ),
        );
        ctx.tell(player.id(), messages.searching.clone());

        let landing = ctx.random_landing(Some(world), Some(column)).await?;
        ctx.world.teleport(player.id(), landing.clone()).await?;
        for line in ctx.landing_notices(&landing) {
            ctx.tell(player.id(), line);
        }
        return Ok(());
    }

    ensure_node(ctx, &target).await?;
    ctx.tell(
        player.id(),
        fill(&messages.teleporting, &[("server", target.clone())]),
    );
    ctx.send_across(TeleportIntent::random(
        player.player.clone(),
        target,
        world.map(str::to_string),
        None,
    ));
    Ok(())
}

/// Moves `player` next to `target`, wherever in the network they are.
pub(crate) async fn teleport_to_player(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    target: &str,
) -> Result<(), TeleportFailure> {
    let entry = ctx
        .lookup(target)
        .await
        .ok_or_else(|| TeleportFailure::PlayerNotFound(target.to_string()))?;

    if entry.node == ctx.name {
        let anchor = ctx
            .world
            .player_by_name(&entry.name)
            .await
            .ok_or_else(|| TeleportFailure::PlayerNotFound(entry.name.clone()))?;
        ctx.world.teleport(player.id(), anchor.location).await?;
        ctx.tell(
            player.id(),
            fill(&ctx.messages().tpa.teleported, &[("player", entry.name)]),
        );
        return Ok(());
    }

    ctx.tell(
        player.id(),
        fill(&ctx.messages().tpa.teleporting, &[("player", entry.name.clone())]),
    );
    ctx.publish_intent(&TeleportIntent::tpa(
        player.player.clone(),
        entry.node,
        TpaStep::PrepareTeleport {
            target: entry.name,
            origin: ctx.name.clone(),
        },
    ));
    Ok(())
}

/// Moves `player` to `location` on `node`.
pub(crate) async fn teleport_to_location(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    node: &str,
    location: Location,
) -> Result<(), TeleportFailure> {
    if node == ctx.name {
        if !ctx.world.has_world(&location.world).await {
            return Err(TeleportFailure::WorldNotFound(location.world));
        }
        let text = fill(&ctx.messages().tpa.teleported, &[("player", location.to_string())]);
        ctx.world.teleport(player.id(), location).await?;
        ctx.tell(player.id(), text);
        return Ok(());
    }

    ensure_node(ctx, node).await?;
    ctx.tell(
        player.id(),
        fill(&ctx.messages().tpa.teleporting, &[("player", location.to_string())]),
    );
    ctx.publish_intent(&TeleportIntent::tpa(
        player.player.clone(),
        node,
        TpaStep::PrepareTeleportCoords {
            location,
            origin: ctx.name.clone(),
        },
    ));
    Ok(())
}

async fn ensure_node(ctx: &NodeContext, node: &str) -> Result<(), TeleportFailure> {
    if ctx.knows_node(node).await {
        Ok(())
    } else {
        Err(TeleportFailure::Refused(fill(
            &ctx.messages().server_not_found,
            &[("server", node.to_string())],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/warp hub"), Ok(Command::Warp("hub".to_string())));
        assert_eq!(Command::parse("WARPS"), Ok(Command::Warps));
        assert_eq!(Command::parse("/spawn extra"), Ok(Command::Spawn));
        assert_eq!(Command::parse("/tpyes"), Ok(Command::TpAccept));
        assert_eq!(Command::parse("  /tpdeny  "), Ok(Command::TpDeny));
        assert_eq!(Command::parse("/tpahere Bob"), Ok(Command::TpaHere("Bob".to_string())));
    }

    #[test]
    fn test_parse_random_teleport_target() {
        assert_eq!(Command::parse("/rtp"), Ok(Command::RandomTp(None)));
        assert_eq!(
            Command::parse("/wild node2"),
            Ok(Command::RandomTp(Some("node2".to_string())))
        );
    }

    #[test]
    fn test_parse_missing_arguments() {
        assert_eq!(Command::parse("/warp"), Err(ParseError::Usage("warp")));
        assert_eq!(Command::parse("/tpa"), Err(ParseError::Usage("tpa")));
        assert_eq!(Command::parse("/tpto"), Err(ParseError::Usage("tpto")));
        assert_eq!(Command::parse(""), Err(ParseError::Empty));
        assert_eq!(Command::parse("/fly"), Err(ParseError::Unknown("fly".to_string())));
    }

    #[test]
    fn test_parse_position() {
        let parsed = Command::parse("/tppos node2 world 10 64.5 -3").unwrap();
        assert_eq!(
            parsed,
            Command::TpPos {
                node: "node2".to_string(),
                location: Location::new("world", 10.0, 64.5, -3.0),
            }
        );

        assert_eq!(
            Command::parse("/tppos node2 world 10 up -3"),
            Err(ParseError::Usage("tppos"))
        );
        assert_eq!(
            Command::parse("/tppos node2 world 10"),
            Err(ParseError::Usage("tppos"))
        );
    }

    #[test]
    fn test_usage_messages() {
        let messages = Messages::default();

        assert_eq!(ParseError::Usage("warp").render(&messages), "Usage: /warp <name>");
        assert_eq!(
            ParseError::Usage("tpa").render(&messages),
            "Usage: /tpa <player>"
        );
        assert_eq!(
            ParseError::Unknown("fly".to_string()).render(&messages),
            "Unknown command: fly"
        );
    }
}
