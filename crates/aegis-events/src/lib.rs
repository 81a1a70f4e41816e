// aegis-events: Typed game events and the in-process event bus.
//
// Every event reconstructed from a server's log stream is one variant of
// [`Event`], serialized with a top-level `kind` field for discriminated
// deserialization by downstream consumers.  Numeric fields that originate
// as log text (damage, tickets, tick rate) are carried as strings; the
// consumer decides whether and how to convert them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod bus;

pub use bus::{EventBus, Subscription, SubscriptionFilter};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Everything known about one player on one server.
///
/// All fields are optional in the log; an empty string means "not yet
/// observed".  Records are merged field-by-field — see [`PlayerData::absorb`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    pub player_controller: String,
    pub ip: String,
    pub steam_id: String,
    pub eos_id: String,
    /// In-game display name.
    pub suffix: String,
    /// Second controller token flavor seen on wound/die lines.
    pub controller: String,
    pub team_id: String,
}

impl PlayerData {
    /// Merge `other` into `self`, field by field.
    ///
    /// A non-empty incoming field replaces the stored one; an empty incoming
    /// field never clears a populated one.
    pub fn absorb(&mut self, other: &PlayerData) {
        merge_field(&mut self.player_controller, &other.player_controller);
        merge_field(&mut self.ip, &other.ip);
        merge_field(&mut self.steam_id, &other.steam_id);
        merge_field(&mut self.eos_id, &other.eos_id);
        merge_field(&mut self.suffix, &other.suffix);
        merge_field(&mut self.controller, &other.controller);
        merge_field(&mut self.team_id, &other.team_id);
    }
}

/// Merge one field: a non-empty `src` replaces `dst`; an empty `src` never
/// clears it.
pub fn merge_field(dst: &mut String, src: &str) {
    if !src.is_empty() {
        dst.clear();
        dst.push_str(src);
    }
}

/// A tickets-based round outcome for one team, as logged by the game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOutcome {
    pub time: String,
    pub team: String,
    pub subfaction: String,
    pub faction: String,
    /// `"won"` or `"lost"`, verbatim from the log.
    pub action: String,
    pub tickets: String,
    pub layer: String,
    pub level: String,
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// An admin broadcast sent through the in-game admin system or RCON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminBroadcast {
    pub time: String,
    pub chain_id: String,
    pub message: String,
    /// Raw source segment.  Literal `RCON` for console broadcasts.
    pub from: String,
    /// Steam ID parsed from the source segment; empty for RCON.
    pub steam_id: String,
}

/// Damage against a deployable (FOB radio, HAB, emplacement).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployableDamaged {
    pub time: String,
    pub chain_id: String,
    pub deployable: String,
    pub damage: String,
    pub weapon: String,
    pub player_suffix: String,
    pub damage_type: String,
    pub health_remaining: String,
}

/// `PostLogin` — the first line a connecting player produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConnected {
    pub time: String,
    pub chain_id: String,
    pub player_controller: String,
    pub ip: String,
    pub eos_id: String,
    pub steam_id: String,
}

/// `Join succeeded` — binds the display name to the earlier `PostLogin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoinSucceeded {
    pub time: String,
    pub chain_id: String,
    pub suffix: String,
    pub eos_id: String,
    pub steam_id: String,
    pub player_controller: String,
    pub ip: String,
}

/// A player controller possessing a pawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPossess {
    pub time: String,
    pub chain_id: String,
    pub player_suffix: String,
    pub eos_id: String,
    pub steam_id: String,
    pub pawn: String,
}

/// Non-lethal damage between soldiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDamaged {
    pub time: String,
    pub chain_id: String,
    pub victim_name: String,
    pub damage: String,
    pub attacker_name: String,
    pub attacker_eos: String,
    pub attacker_steam: String,
    pub attacker_controller: String,
    pub weapon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<PlayerData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attacker: Option<PlayerData>,
    pub teamkill: bool,
}

/// A soldier going down (revivable).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerWounded {
    pub time: String,
    pub chain_id: String,
    pub victim_name: String,
    pub damage: String,
    pub attacker_name: String,
    pub attacker_eos: String,
    pub attacker_steam: String,
    pub attacker_controller: String,
    pub weapon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<PlayerData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attacker: Option<PlayerData>,
    pub teamkill: bool,
}

/// A soldier dying outright or giving up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDied {
    pub time: String,
    pub chain_id: String,
    /// Time of the wound that led to this death, when known.
    pub wound_time: String,
    pub victim_name: String,
    pub damage: String,
    pub attacker_name: String,
    pub attacker_eos: String,
    pub attacker_steam: String,
    pub attacker_controller: String,
    pub weapon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<PlayerData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attacker: Option<PlayerData>,
    pub teamkill: bool,
}

/// A medic revive.  Identifiers are carried verbatim from the line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRevived {
    pub time: String,
    pub chain_id: String,
    pub reviver_name: String,
    pub reviver_eos: String,
    pub reviver_steam: String,
    pub victim_name: String,
    pub victim_eos: String,
    pub victim_steam: String,
}

/// Network channel close for a player connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnected {
    pub time: String,
    pub chain_id: String,
    pub ip: String,
    pub player_controller: String,
    pub eos_id: String,
    /// Enriched from the player record when one was stored; else empty.
    pub suffix: String,
    pub team_id: String,
}

/// Periodic server tick-rate report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRate {
    pub time: String,
    pub chain_id: String,
    pub tick_rate: String,
}

/// End of a round, either announced by `DetermineMatchWinner` or inferred
/// from the `InProgress → WaitingPostMatch` state transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEnded {
    pub time: String,
    pub chain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_tickets: Option<TicketOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_tickets: Option<TicketOutcome>,
}

/// Tickets-based win/loss report for one team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTickets {
    pub time: String,
    pub chain_id: String,
    pub team: String,
    pub subfaction: String,
    pub faction: String,
    pub action: String,
    pub tickets: String,
    pub layer: String,
    pub level: String,
}

/// Map load for the next match.
///
/// `winner`/`layer` are inherited from the preceding match-winner
/// announcement when one was captured.  `winner` is `None` when the game
/// printed two conflicting announcements for the same boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGame {
    pub time: String,
    pub chain_id: String,
    pub dlc: String,
    pub map_classname: String,
    pub layer_classname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

// ---------------------------------------------------------------------------
// Event enum
// ---------------------------------------------------------------------------

/// One reconstructed game event.
///
/// Serialized form carries a `kind` discriminator:
/// ```json
/// { "kind": "player_connected", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum Event {
    AdminBroadcast(AdminBroadcast),
    DeployableDamaged(DeployableDamaged),
    PlayerConnected(PlayerConnected),
    PlayerJoinSucceeded(PlayerJoinSucceeded),
    PlayerPossess(PlayerPossess),
    PlayerDamaged(PlayerDamaged),
    PlayerWounded(PlayerWounded),
    PlayerDied(PlayerDied),
    PlayerRevived(PlayerRevived),
    PlayerDisconnected(PlayerDisconnected),
    TickRate(TickRate),
    RoundEnded(RoundEnded),
    RoundTickets(RoundTickets),
    NewGame(NewGame),
}

/// Discriminator for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AdminBroadcast,
    DeployableDamaged,
    PlayerConnected,
    PlayerJoinSucceeded,
    PlayerPossess,
    PlayerDamaged,
    PlayerWounded,
    PlayerDied,
    PlayerRevived,
    PlayerDisconnected,
    TickRate,
    RoundEnded,
    RoundTickets,
    NewGame,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AdminBroadcast(_) => EventKind::AdminBroadcast,
            Event::DeployableDamaged(_) => EventKind::DeployableDamaged,
            Event::PlayerConnected(_) => EventKind::PlayerConnected,
            Event::PlayerJoinSucceeded(_) => EventKind::PlayerJoinSucceeded,
            Event::PlayerPossess(_) => EventKind::PlayerPossess,
            Event::PlayerDamaged(_) => EventKind::PlayerDamaged,
            Event::PlayerWounded(_) => EventKind::PlayerWounded,
            Event::PlayerDied(_) => EventKind::PlayerDied,
            Event::PlayerRevived(_) => EventKind::PlayerRevived,
            Event::PlayerDisconnected(_) => EventKind::PlayerDisconnected,
            Event::TickRate(_) => EventKind::TickRate,
            Event::RoundEnded(_) => EventKind::RoundEnded,
            Event::RoundTickets(_) => EventKind::RoundTickets,
            Event::NewGame(_) => EventKind::NewGame,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit published on the bus: which server, what happened, and the raw
/// line the event was reconstructed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub server_id: Uuid,
    pub event: Event,
    pub raw_line: String,
}
