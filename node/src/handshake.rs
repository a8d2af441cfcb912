//! Player-to-player teleport requests.
//!
//! A request lives as a ticket on the target's node until it is accepted,
//! denied, replaced by a newer request or swept after expiry. Accepting
//! makes the node hosting the stationary party resolve their location; that
//! node then admits the travelling party as a pending arrival and asks the
//! proxy tier to move them over.

use crate::coordinator::NodeContext;
use crate::error::TeleportFailure;
use crate::messages::fill;
use crate::tickets::TpaTicket;
use crate::world::OnlinePlayer;
use log::debug;
use shared::{Location, PlayerRef, TeleportIntent, TpaStep};
use std::time::Duration;
use tokio::time::Instant;

/// Sends a request from `player` to `target`. With `here`, the target is
/// asked to come to `player` instead.
pub(crate) async fn request(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    target: &str,
    here: bool,
) -> Result<(), TeleportFailure> {
    let config = &ctx.config.tpa;
    let messages = &ctx.messages().tpa;

    if !config.enabled || config.disabled_servers.contains(&ctx.name) {
        return Err(TeleportFailure::Refused(messages.disabled.clone()));
    }
    if player.player.has_name(target) {
        return Err(TeleportFailure::Refused(messages.cannot_self.clone()));
    }
    let entry = ctx
        .lookup(target)
        .await
        .ok_or_else(|| TeleportFailure::PlayerNotFound(target.to_string()))?;
    if config.disabled_servers.contains(&entry.node) {
        return Err(TeleportFailure::Refused(fill(
            &messages.target_disabled,
            &[("server", entry.node)],
        )));
    }

    let step = if here {
        TpaStep::HereRequest {
            target: entry.name.clone(),
        }
    } else {
        TpaStep::Request {
            target: entry.name.clone(),
        }
    };
    ctx.publish_intent(&TeleportIntent::tpa(player.player.clone(), entry.node, step));

    let template = if here { &messages.here_sent } else { &messages.sent };
    ctx.tell(player.id(), fill(template, &[("player", entry.name)]));
    Ok(())
}

/// Accepts the request addressed to `accepter`, if it is still open.
pub(crate) async fn accept(ctx: &NodeContext, accepter: &OnlinePlayer) -> Result<(), TeleportFailure> {
    let ticket = ctx
        .tickets
        .take(accepter.name(), Instant::now())
        .ok_or(TeleportFailure::TicketExpiredOrAbsent)?;
    let requester = ticket.requester;
    let messages = &ctx.messages().tpa;

    let entry = ctx.lookup(&requester.name).await.ok_or_else(|| {
        TeleportFailure::Refused(fill(
            &messages.requester_offline,
            &[("player", requester.name.clone())],
        ))
    })?;

    let intent = if ticket.here {
        // The accepter travels; the requester's node knows where to.
        TeleportIntent::tpa(
            requester.clone(),
            entry.node,
            TpaStep::AcceptHereGetLocation {
                accepter: accepter.player.clone(),
                accepter_node: ctx.name.clone(),
            },
        )
    } else {
        TeleportIntent::tpa(
            accepter.player.clone(),
            ctx.name.clone(),
            TpaStep::AcceptGetLocation {
                requester: requester.clone(),
                requester_node: entry.node,
            },
        )
    };
    ctx.publish_intent(&intent);

    ctx.tell(
        accepter.id(),
        fill(&messages.accepted, &[("player", requester.name)]),
    );
    Ok(())
}

/// Declines the request addressed to `denier` and tells the requester.
pub(crate) async fn deny(ctx: &NodeContext, denier: &OnlinePlayer) -> Result<(), TeleportFailure> {
    let ticket = ctx
        .tickets
        .take(denier.name(), Instant::now())
        .ok_or(TeleportFailure::TicketExpiredOrAbsent)?;
    let requester = ticket.requester;

    match ctx.lookup(&requester.name).await {
        Some(entry) => ctx.publish_intent(&TeleportIntent::tpa(
            requester.clone(),
            entry.node,
            TpaStep::Deny {
                denier: denier.name().to_string(),
            },
        )),
        None => debug!("{} went offline before the denial", requester),
    }

    ctx.tell(
        denier.id(),
        fill(&ctx.messages().tpa.denied, &[("player", requester.name)]),
    );
    Ok(())
}

/// Handles a request-protocol phase addressed to this node.
pub(crate) async fn on_step(ctx: &NodeContext, intent: &TeleportIntent, step: &TpaStep) {
    debug!("Handling {} for {} on {}", step.name(), intent.player, ctx.name);
    match step {
        TpaStep::Request { target } => open_ticket(ctx, &intent.player, target, false).await,
        TpaStep::HereRequest { target } => open_ticket(ctx, &intent.player, target, true).await,
        TpaStep::AcceptGetLocation { requester, .. } => {
            match ctx.world.player_by_name(&intent.player.name).await {
                Some(accepter) => bring_over(ctx, requester, &accepter).await,
                None => debug!("{} left before their location was read", intent.player),
            }
        }
        TpaStep::AcceptHereGetLocation { accepter, .. } => {
            match ctx.world.player_by_name(&intent.player.name).await {
                Some(requester) => bring_over(ctx, accepter, &requester).await,
                None => debug!("{} left before their location was read", intent.player),
            }
        }
        TpaStep::Arrive { location, anchor } => {
            match ctx.world.player_by_id(&intent.player.id).await {
                Some(player) => {
                    let result = move_here(ctx, &player, location.clone(), anchor).await;
                    let _ = ctx.report(player.id(), result);
                }
                None => {
                    ctx.pending.admit(&intent.player.id, intent.clone());
                }
            }
        }
        TpaStep::PrepareTeleport { origin, .. } | TpaStep::PrepareTeleportCoords { origin, .. } => {
            if let Some(player) = ctx.world.player_by_id(&intent.player.id).await {
                let result = prepared_here(ctx, &player, step).await;
                let _ = ctx.report(player.id(), result);
                return;
            }
            ctx.pending.admit(&intent.player.id, intent.clone());
            ctx.publish_intent(&TeleportIntent::tpa(
                intent.player.clone(),
                origin.clone(),
                TpaStep::MovePlayer {
                    node: ctx.name.clone(),
                },
            ));
        }
        TpaStep::MovePlayer { node } => {
            if ctx.world.player_by_id(&intent.player.id).await.is_some() {
                ctx.request_transfer(&intent.player.id, node);
            } else {
                debug!("{} is no longer on {}, not moving", intent.player, ctx.name);
            }
        }
        TpaStep::Deny { denier } => match ctx.world.player_by_name(&intent.player.name).await {
            Some(requester) => ctx.tell(
                requester.id(),
                fill(&ctx.messages().tpa.request_denied, &[("player", denier.clone())]),
            ),
            None => debug!("{} is gone, dropping denial", intent.player),
        },
    }
}

/// Stores a ticket for `target` if they are on this node. Replaces any
/// earlier ticket for the same target.
async fn open_ticket(ctx: &NodeContext, requester: &PlayerRef, target: &str, here: bool) {
    let Some(recipient) = ctx.world.player_by_name(target).await else {
        debug!("{} is not on {}, dropping request", target, ctx.name);
        return;
    };

    let expire_seconds = ctx.config.tpa.expire_seconds;
    let ticket = TpaTicket::new(requester.clone(), here, Duration::from_secs(expire_seconds));
    if let Some(previous) = ctx.tickets.issue(recipient.name(), ticket) {
        debug!(
            "Request from {} to {} replaced by one from {}",
            previous.requester,
            recipient.name(),
            requester
        );
    }

    let messages = &ctx.messages().tpa;
    let template = if here { &messages.here_received } else { &messages.received };
    ctx.tell(recipient.id(), fill(template, &[("player", requester.name.clone())]));
    ctx.tell(
        recipient.id(),
        fill(&messages.buttons, &[("seconds", expire_seconds.to_string())]),
    );
}

/// Brings `traveler` next to `anchor`, who is on this node.
async fn bring_over(ctx: &NodeContext, traveler: &PlayerRef, anchor: &OnlinePlayer) {
    let location = anchor.location.clone();

    if let Some(local) = ctx.world.player_by_id(&traveler.id).await {
        let result = move_here(ctx, &local, location, anchor.name()).await;
        let _ = ctx.report(local.id(), result);
        return;
    }

    let arrival = TeleportIntent::tpa(
        traveler.clone(),
        ctx.name.clone(),
        TpaStep::Arrive {
            location,
            anchor: anchor.name().to_string(),
        },
    );
    ctx.pending.admit(&traveler.id, arrival);
    ctx.request_transfer(&traveler.id, &ctx.name);
}

async fn move_here(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    location: Location,
    anchor: &str,
) -> Result<(), TeleportFailure> {
    ctx.world.teleport(player.id(), location).await?;
    ctx.tell(
        player.id(),
        fill(&ctx.messages().tpa.teleported, &[("player", anchor.to_string())]),
    );
    Ok(())
}

/// A prepare step for a player who is already here: apply it directly.
async fn prepared_here(
    ctx: &NodeContext,
    player: &OnlinePlayer,
    step: &TpaStep,
) -> Result<(), TeleportFailure> {
    match step {
        TpaStep::PrepareTeleport { target, .. } => {
            let anchor = ctx
                .world
                .player_by_name(target)
                .await
                .ok_or_else(|| TeleportFailure::PlayerNotFound(target.clone()))?;
            move_here(ctx, player, anchor.location.clone(), anchor.name()).await
        }
        TpaStep::PrepareTeleportCoords { location, .. } => {
            move_here(ctx, player, location.clone(), &location.to_string()).await
        }
        _ => Ok(()),
    }
}
