//! Handler bodies for matched log lines.
//!
//! A handler mutates the event store and publishes exactly one typed event,
//! or drops the line (attacker EOS marked `INVALID`, transition-map world
//! loads, malformed captures).  Handlers run on the dispatcher task, one
//! line at a time; they never need to guard against concurrent invocation
//! on the same store.

use super::{LineRule, group, parse_online_ids};
use crate::store::{EventStore, JoinRequestData, SessionData, StoreError, WonData, usable_key};
use aegis_events::{
    AdminBroadcast, DeployableDamaged, Event, EventBus, NewGame, PlayerConnected, PlayerData,
    PlayerDamaged, PlayerDied, PlayerDisconnected, PlayerJoinSucceeded, PlayerPossess,
    PlayerRevived, PlayerWounded, RoundEnded, RoundTickets, TicketOutcome, TickRate,
};
use regex::Captures;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Context and errors
// ---------------------------------------------------------------------------

/// Everything a handler may touch.
pub struct HandlerCtx<'a> {
    pub server_id: Uuid,
    pub store: &'a dyn EventStore,
    pub bus: &'a EventBus,
    pub raw_line: &'a str,
}

impl HandlerCtx<'_> {
    fn publish(&self, event: Event) {
        self.bus.publish(self.server_id, event, self.raw_line);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("malformed capture: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Route a matched line to its handler.
pub async fn handle(
    rule: LineRule,
    ctx: &HandlerCtx<'_>,
    caps: &Captures<'_>,
) -> Result<(), HandlerError> {
    match rule {
        LineRule::AdminBroadcast => on_admin_broadcast(ctx, caps),
        LineRule::DeployableDamaged => on_deployable_damaged(ctx, caps),
        LineRule::PlayerConnected => on_player_connected(ctx, caps).await,
        LineRule::PlayerPossess => on_player_possess(ctx, caps).await,
        LineRule::PlayerDamaged => on_combat(ctx, caps, CombatKind::Damaged).await,
        LineRule::PlayerWounded => on_combat(ctx, caps, CombatKind::Wounded).await,
        LineRule::PlayerDied => on_combat(ctx, caps, CombatKind::Died).await,
        LineRule::PlayerRevived => on_player_revived(ctx, caps),
        LineRule::JoinSucceeded => on_join_succeeded(ctx, caps).await,
        LineRule::PlayerDisconnected => on_player_disconnected(ctx, caps).await,
        LineRule::TickRate => on_tick_rate(ctx, caps),
        LineRule::RoundTickets => on_round_tickets(ctx, caps).await,
        LineRule::MatchWinner => on_match_winner(ctx, caps).await,
        LineRule::RoundStateChange => on_round_state_change(ctx, caps).await,
        LineRule::WorldBringing => on_world_bringing(ctx, caps).await,
    }
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

fn time_of(caps: &Captures<'_>) -> String {
    group(caps, 1).to_owned()
}

fn chain_of(caps: &Captures<'_>) -> String {
    group(caps, 2).trim().to_owned()
}

/// An identifier as a storable field: `INVALID`-tainted values become empty.
fn sanitized(id: &str) -> String {
    if usable_key(id) { id.to_owned() } else { String::new() }
}

// ---------------------------------------------------------------------------
// Stateless handlers
// ---------------------------------------------------------------------------

fn on_admin_broadcast(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let from = group(caps, 4).to_owned();
    let steam_id = if from == "RCON" {
        String::new()
    } else {
        parse_online_ids(&from).1
    };
    ctx.publish(Event::AdminBroadcast(AdminBroadcast {
        time: time_of(caps),
        chain_id: chain_of(caps),
        message: group(caps, 3).to_owned(),
        from,
        steam_id,
    }));
    Ok(())
}

fn on_deployable_damaged(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    ctx.publish(Event::DeployableDamaged(DeployableDamaged {
        time: time_of(caps),
        chain_id: chain_of(caps),
        deployable: group(caps, 3).to_owned(),
        damage: group(caps, 4).to_owned(),
        weapon: group(caps, 5).to_owned(),
        player_suffix: group(caps, 6).to_owned(),
        damage_type: group(caps, 7).to_owned(),
        health_remaining: group(caps, 8).to_owned(),
    }));
    Ok(())
}

fn on_player_revived(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let (reviver_eos, reviver_steam) = parse_online_ids(group(caps, 4));
    let (victim_eos, victim_steam) = parse_online_ids(group(caps, 6));
    ctx.publish(Event::PlayerRevived(PlayerRevived {
        time: time_of(caps),
        chain_id: chain_of(caps),
        reviver_name: group(caps, 3).to_owned(),
        reviver_eos,
        reviver_steam,
        victim_name: group(caps, 5).to_owned(),
        victim_eos,
        victim_steam,
    }));
    Ok(())
}

fn on_tick_rate(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    ctx.publish(Event::TickRate(TickRate {
        time: time_of(caps),
        chain_id: chain_of(caps),
        tick_rate: group(caps, 3).to_owned(),
    }));
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

async fn on_player_connected(
    ctx: &HandlerCtx<'_>,
    caps: &Captures<'_>,
) -> Result<(), HandlerError> {
    let chain_id = chain_of(caps);
    let player_controller = group(caps, 3).to_owned();
    let ip = group(caps, 4).to_owned();
    let (eos_id, steam_id) = parse_online_ids(group(caps, 5));

    ctx.store
        .store_join_request(JoinRequestData {
            chain_id: chain_id.clone(),
            suffix: String::new(),
            player_controller: player_controller.clone(),
            ip: ip.clone(),
            eos_id: eos_id.clone(),
            steam_id: steam_id.clone(),
        })
        .await?;

    // Index under EOS, falling back to Steam.  With neither there is no key
    // and the record is carried only by the join request.
    let key = if usable_key(&eos_id) {
        eos_id.as_str()
    } else if usable_key(&steam_id) {
        steam_id.as_str()
    } else {
        ""
    };
    if !key.is_empty() {
        ctx.store
            .store_player(
                key,
                PlayerData {
                    player_controller: player_controller.clone(),
                    ip: ip.clone(),
                    steam_id: sanitized(&steam_id),
                    eos_id: sanitized(&eos_id),
                    ..PlayerData::default()
                },
            )
            .await?;
        ctx.store.clear_disconnected(key).await?;
    }

    ctx.publish(Event::PlayerConnected(PlayerConnected {
        time: time_of(caps),
        chain_id,
        player_controller,
        ip,
        eos_id,
        steam_id,
    }));
    Ok(())
}

async fn on_join_succeeded(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let chain_id = chain_of(caps);
    let suffix = group(caps, 3).to_owned();

    let event = match ctx.store.take_join_request(&chain_id).await? {
        Some(request) => {
            let key = if usable_key(&request.eos_id) {
                request.eos_id.as_str()
            } else if usable_key(&request.steam_id) {
                request.steam_id.as_str()
            } else {
                ""
            };
            if !key.is_empty() {
                ctx.store
                    .store_player(
                        key,
                        PlayerData {
                            player_controller: request.player_controller.clone(),
                            ip: request.ip.clone(),
                            steam_id: sanitized(&request.steam_id),
                            eos_id: sanitized(&request.eos_id),
                            suffix: suffix.clone(),
                            ..PlayerData::default()
                        },
                    )
                    .await?;
            }
            PlayerJoinSucceeded {
                time: time_of(caps),
                chain_id,
                suffix,
                eos_id: request.eos_id,
                steam_id: request.steam_id,
                player_controller: request.player_controller,
                ip: request.ip,
            }
        }
        None => PlayerJoinSucceeded {
            time: time_of(caps),
            chain_id,
            suffix,
            ..PlayerJoinSucceeded::default()
        },
    };
    ctx.publish(Event::PlayerJoinSucceeded(event));
    Ok(())
}

async fn on_player_possess(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let chain_id = chain_of(caps);
    let player_suffix = group(caps, 3).to_owned();
    let (eos_id, steam_id) = parse_online_ids(group(caps, 4));

    ctx.store
        .store_session(
            &player_suffix,
            SessionData {
                chain_id: chain_id.clone(),
                time: time_of(caps),
                eos_id: sanitized(&eos_id),
                ..SessionData::default()
            },
        )
        .await?;

    ctx.publish(Event::PlayerPossess(PlayerPossess {
        time: time_of(caps),
        chain_id,
        player_suffix,
        eos_id,
        steam_id,
        pawn: group(caps, 5).to_owned(),
    }));
    Ok(())
}

async fn on_player_disconnected(
    ctx: &HandlerCtx<'_>,
    caps: &Captures<'_>,
) -> Result<(), HandlerError> {
    let ip = group(caps, 3).to_owned();
    let player_controller = group(caps, 4).to_owned();
    let unique_id = group(caps, 5).to_owned();

    let stored = ctx.store.get_player(&unique_id).await?;
    let event = match stored {
        Some(player) => {
            // The record may be indexed under only one of the two keys; the
            // extra delete is a no-op then.
            ctx.store.remove_player(&unique_id).await?;
            if usable_key(&player.eos_id) {
                ctx.store.remove_player(&player.eos_id).await?;
            }
            if usable_key(&player.steam_id) {
                ctx.store.remove_player(&player.steam_id).await?;
            }
            PlayerDisconnected {
                time: time_of(caps),
                chain_id: chain_of(caps),
                ip,
                player_controller,
                eos_id: unique_id.clone(),
                suffix: player.suffix,
                team_id: player.team_id,
            }
        }
        None => PlayerDisconnected {
            time: time_of(caps),
            chain_id: chain_of(caps),
            ip,
            player_controller,
            eos_id: unique_id.clone(),
            ..PlayerDisconnected::default()
        },
    };
    ctx.store.mark_disconnected(&unique_id).await?;
    ctx.publish(Event::PlayerDisconnected(event));
    Ok(())
}

// ---------------------------------------------------------------------------
// Combat (damaged / wounded / died)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum CombatKind {
    Damaged,
    Wounded,
    Died,
}

async fn on_combat(
    ctx: &HandlerCtx<'_>,
    caps: &Captures<'_>,
    kind: CombatKind,
) -> Result<(), HandlerError> {
    let time = time_of(caps);
    let chain_id = chain_of(caps);
    let victim_name = group(caps, 3).to_owned();
    let damage = group(caps, 4).to_owned();
    let attacker_name = group(caps, 5).to_owned();
    let (attacker_eos, attacker_steam) = parse_online_ids(group(caps, 6));
    let attacker_controller = group(caps, 7).to_owned();
    let weapon = group(caps, 8).to_owned();

    // The game substitutes INVALID for attackers it cannot identify (world
    // damage, despawned causers); those lines carry nothing correlatable.
    if attacker_eos.contains("INVALID") {
        return Ok(());
    }
    if victim_name.is_empty() {
        return Err(HandlerError::Malformed("empty victim name".to_owned()));
    }

    // Merge the combat view into the victim's session.  Chain ID, team ID
    // and EOS ID are deliberately left empty so an earlier possess's values
    // survive the merge.
    let mut session = SessionData {
        time: time.clone(),
        victim_name: victim_name.clone(),
        damage: damage.clone(),
        attacker_name: attacker_name.clone(),
        attacker_eos: attacker_eos.clone(),
        attacker_steam: attacker_steam.clone(),
        attacker_controller: attacker_controller.clone(),
        weapon: weapon.clone(),
        ..SessionData::default()
    };
    if matches!(kind, CombatKind::Wounded) {
        session.wound_time = time.clone();
    }
    ctx.store.store_session(&victim_name, session).await?;

    let victim = ctx.store.resolve_by_name(&victim_name).await?;
    let mut attacker = ctx.store.resolve_by_eos(&attacker_eos).await?;
    if attacker.is_none() && !matches!(kind, CombatKind::Damaged) {
        attacker = ctx.store.resolve_by_controller(&attacker_controller).await?;
    }

    // The wound/die controller token often arrives before any other line
    // carries it; patch the stored record and re-resolve so the emitted
    // attacker is complete.
    let patch_key = attacker.as_ref().and_then(|resolved| {
        (resolved.player_controller.is_empty()
            && !attacker_controller.is_empty()
            && usable_key(&resolved.eos_id))
        .then(|| resolved.eos_id.clone())
    });
    if let Some(eos) = patch_key {
        ctx.store
            .store_player(
                &eos,
                PlayerData {
                    player_controller: attacker_controller.clone(),
                    ..PlayerData::default()
                },
            )
            .await?;
        attacker = ctx.store.resolve_by_eos(&eos).await?;
    }

    let teamkill = ctx
        .store
        .check_teamkill(&victim_name, &attacker_eos)
        .await?;

    // With resolved objects attached the flat name fields are redundant.
    let victim_name_out = if victim.is_some() {
        String::new()
    } else {
        victim_name.clone()
    };
    let attacker_name_out = if attacker.is_some() {
        String::new()
    } else {
        attacker_name
    };

    let event = match kind {
        CombatKind::Damaged => Event::PlayerDamaged(PlayerDamaged {
            time,
            chain_id,
            victim_name: victim_name_out,
            damage,
            attacker_name: attacker_name_out,
            attacker_eos,
            attacker_steam,
            attacker_controller,
            weapon,
            victim,
            attacker,
            teamkill,
        }),
        CombatKind::Wounded => Event::PlayerWounded(PlayerWounded {
            time,
            chain_id,
            victim_name: victim_name_out,
            damage,
            attacker_name: attacker_name_out,
            attacker_eos,
            attacker_steam,
            attacker_controller,
            weapon,
            victim,
            attacker,
            teamkill,
        }),
        CombatKind::Died => {
            let wound_time = ctx
                .store
                .get_session(&victim_name)
                .await?
                .map(|s| s.wound_time)
                .unwrap_or_default();
            Event::PlayerDied(PlayerDied {
                time,
                chain_id,
                wound_time,
                victim_name: victim_name_out,
                damage,
                attacker_name: attacker_name_out,
                attacker_eos,
                attacker_steam,
                attacker_controller,
                weapon,
                victim,
                attacker,
                teamkill,
            })
        }
    };
    ctx.publish(event);
    Ok(())
}

// ---------------------------------------------------------------------------
// Round and match boundaries
// ---------------------------------------------------------------------------

async fn on_round_tickets(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let action = group(caps, 6).to_owned();
    let outcome = TicketOutcome {
        time: time_of(caps),
        team: group(caps, 3).to_owned(),
        subfaction: group(caps, 4).to_owned(),
        faction: group(caps, 5).to_owned(),
        action: action.clone(),
        tickets: group(caps, 7).to_owned(),
        layer: group(caps, 8).to_owned(),
        level: group(caps, 9).to_owned(),
    };
    match action.as_str() {
        "won" => ctx.store.store_round_winner(outcome.clone()).await?,
        "lost" => ctx.store.store_round_loser(outcome.clone()).await?,
        other => {
            return Err(HandlerError::Malformed(format!(
                "unexpected ticket action {other:?}"
            )));
        }
    }
    ctx.publish(Event::RoundTickets(RoundTickets {
        time: outcome.time.clone(),
        chain_id: chain_of(caps),
        team: outcome.team,
        subfaction: outcome.subfaction,
        faction: outcome.faction,
        action: outcome.action,
        tickets: outcome.tickets,
        layer: outcome.layer,
        level: outcome.level,
    }));
    Ok(())
}

async fn on_match_winner(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let winner = group(caps, 3).to_owned();
    let layer = group(caps, 4).to_owned();
    ctx.store
        .store_won_data(WonData {
            winner: Some(winner.clone()),
            layer: layer.clone(),
            time: time_of(caps),
        })
        .await?;
    ctx.publish(Event::RoundEnded(RoundEnded {
        time: time_of(caps),
        chain_id: chain_of(caps),
        winner: Some(winner),
        layer: Some(layer),
        winner_tickets: None,
        loser_tickets: None,
    }));
    Ok(())
}

async fn on_round_state_change(
    ctx: &HandlerCtx<'_>,
    caps: &Captures<'_>,
) -> Result<(), HandlerError> {
    let winner_tickets = ctx.store.round_winner(true).await?;
    let loser_tickets = ctx.store.round_loser(true).await?;
    ctx.publish(Event::RoundEnded(RoundEnded {
        time: time_of(caps),
        chain_id: chain_of(caps),
        winner: winner_tickets.as_ref().map(|t| t.faction.clone()),
        layer: winner_tickets.as_ref().map(|t| t.layer.clone()),
        winner_tickets,
        loser_tickets,
    }));
    Ok(())
}

async fn on_world_bringing(ctx: &HandlerCtx<'_>, caps: &Captures<'_>) -> Result<(), HandlerError> {
    let dlc = group(caps, 3).to_owned();
    let map_classname = group(caps, 4).to_owned();
    let layer_classname = group(caps, 5).to_owned();
    // Between matches the game loads a placeholder world; not a new game.
    if map_classname == "TransitionMap" || layer_classname == "TransitionMap" {
        return Ok(());
    }

    let won = ctx.store.take_won_data().await?;
    ctx.store.clear_new_game_data().await?;

    let (winner, layer) = match won {
        Some(w) => (w.winner, Some(w.layer)),
        None => (None, None),
    };
    ctx.publish(Event::NewGame(NewGame {
        time: time_of(caps),
        chain_id: chain_of(caps),
        dlc,
        map_classname,
        layer_classname,
        winner,
        layer,
    }));
    Ok(())
}
