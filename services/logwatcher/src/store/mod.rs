//! Short-lived per-server state for cross-line event correlation.
//!
//! One store instance belongs to exactly one dispatcher.  Handlers are the
//! only hot-path writers; external collaborators may read and patch records
//! (team assignments arrive out of band) through the same interface.
//!
//! Two backends share the [`EventStore`] contract: an in-memory store
//! ([`memory::MemoryStore`]) and a cache-backed store
//! ([`redis::RedisStore`]).  The in-memory backend is authoritative for
//! semantics; the cache backend accepts weakened atomicity on multi-key
//! paths (a consume racing another consumer can, rarely, double-deliver).
//!
//! All reads return owned copies.  Merge writes never clear a populated
//! field.  Identifiers containing the literal token `INVALID` are treated
//! as missing and never become keys.

use aegis_events::{PlayerData, TicketOutcome, merge_field};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Combat context keyed by a display name.  Lives until the next new-game
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub chain_id: String,
    pub time: String,
    pub wound_time: String,
    pub victim_name: String,
    pub damage: String,
    pub attacker_name: String,
    pub attacker_eos: String,
    pub attacker_steam: String,
    pub attacker_controller: String,
    pub weapon: String,
    pub team_id: String,
    pub eos_id: String,
}

impl SessionData {
    /// Field-by-field merge with the same non-clearing rule as
    /// [`PlayerData::absorb`].
    pub fn absorb(&mut self, other: &SessionData) {
        merge_field(&mut self.chain_id, &other.chain_id);
        merge_field(&mut self.time, &other.time);
        merge_field(&mut self.wound_time, &other.wound_time);
        merge_field(&mut self.victim_name, &other.victim_name);
        merge_field(&mut self.damage, &other.damage);
        merge_field(&mut self.attacker_name, &other.attacker_name);
        merge_field(&mut self.attacker_eos, &other.attacker_eos);
        merge_field(&mut self.attacker_steam, &other.attacker_steam);
        merge_field(&mut self.attacker_controller, &other.attacker_controller);
        merge_field(&mut self.weapon, &other.weapon);
        merge_field(&mut self.team_id, &other.team_id);
        merge_field(&mut self.eos_id, &other.eos_id);
    }
}

/// `PostLogin` details waiting for the `Join succeeded` line on the same
/// chain.  Consumed on first read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestData {
    pub chain_id: String,
    pub suffix: String,
    pub player_controller: String,
    pub ip: String,
    pub eos_id: String,
    pub steam_id: String,
}

/// The between-matches scratchpad carrying the announced match winner into
/// the next new-game event.
///
/// `winner` is tri-state on purpose: `None` means the game printed two
/// conflicting announcements for the same boundary and the winner is
/// therefore unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WonData {
    pub winner: Option<String>,
    pub layer: String,
    pub time: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),
    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Key hygiene
// ---------------------------------------------------------------------------

/// True when `id` may be used as a store key.
///
/// The game substitutes the literal token `INVALID` into identifier slots
/// it could not fill; such identifiers are treated as missing everywhere.
pub fn usable_key(id: &str) -> bool {
    !id.is_empty() && !id.contains("INVALID")
}

// ---------------------------------------------------------------------------
// EventStore contract
// ---------------------------------------------------------------------------

/// The per-server correlation store.
///
/// The resolution helpers (`resolve_by_*`, `check_teamkill`) are provided
/// on top of the backend primitives so both backends share one set of
/// semantics.
#[async_trait]
pub trait EventStore: Send + Sync {
    // -- join requests ------------------------------------------------------

    async fn store_join_request(&self, request: JoinRequestData) -> Result<(), StoreError>;

    /// Consume-on-read: at most one caller ever observes a given request.
    async fn take_join_request(&self, chain_id: &str)
    -> Result<Option<JoinRequestData>, StoreError>;

    // -- players ------------------------------------------------------------

    /// Merge `data` into the record at `key`.  Keys failing [`usable_key`]
    /// are silently ignored.
    async fn store_player(&self, key: &str, data: PlayerData) -> Result<(), StoreError>;

    async fn get_player(&self, key: &str) -> Result<Option<PlayerData>, StoreError>;

    async fn remove_player(&self, key: &str) -> Result<(), StoreError>;

    /// All player records (order unspecified).  Backing scan for the
    /// resolution helpers.
    async fn scan_players(&self) -> Result<Vec<PlayerData>, StoreError>;

    // -- sessions -----------------------------------------------------------

    /// Merge `data` into the session record for `name`.
    async fn store_session(&self, name: &str, data: SessionData) -> Result<(), StoreError>;

    async fn get_session(&self, name: &str) -> Result<Option<SessionData>, StoreError>;

    // -- disconnection markers ---------------------------------------------

    async fn mark_disconnected(&self, key: &str) -> Result<(), StoreError>;

    async fn clear_disconnected(&self, key: &str) -> Result<(), StoreError>;

    async fn is_disconnected(&self, key: &str) -> Result<bool, StoreError>;

    // -- round bookkeeping --------------------------------------------------

    async fn store_round_winner(&self, outcome: TicketOutcome) -> Result<(), StoreError>;

    async fn store_round_loser(&self, outcome: TicketOutcome) -> Result<(), StoreError>;

    /// Fetch the round winner; `consume` removes it atomically.
    async fn round_winner(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError>;

    async fn round_loser(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError>;

    /// Store the pending match-winner record.  When a record is already
    /// present the stored winner becomes unknown (`None`) and the rest of
    /// the incoming record replaces the old one.
    async fn store_won_data(&self, data: WonData) -> Result<(), StoreError>;

    /// Consume the pending match-winner record.
    async fn take_won_data(&self) -> Result<Option<WonData>, StoreError>;

    /// Match boundary: wipe sessions and disconnection markers.  Players
    /// and join requests survive.
    async fn clear_new_game_data(&self) -> Result<(), StoreError>;

    // -- resolution helpers (shared semantics) ------------------------------

    /// Resolve a player by display name.
    ///
    /// A session record for the name is preferred as the source of the
    /// EOS/team view; otherwise the player map is scanned for a matching
    /// suffix, and session fields overlay whatever is missing.
    async fn resolve_by_name(&self, name: &str) -> Result<Option<PlayerData>, StoreError> {
        if name.is_empty() {
            return Ok(None);
        }
        let session = self.get_session(name).await?;
        if let Some(s) = &session {
            if usable_key(&s.eos_id) {
                if let Some(mut player) = self.get_player(&s.eos_id).await? {
                    if player.team_id.is_empty() {
                        player.team_id = s.team_id.clone();
                    }
                    if player.suffix.is_empty() {
                        player.suffix = name.to_owned();
                    }
                    return Ok(Some(player));
                }
            }
        }
        let players = self.scan_players().await?;
        if let Some(mut player) = players.into_iter().find(|p| p.suffix == name) {
            if let Some(s) = &session {
                if player.team_id.is_empty() {
                    player.team_id = s.team_id.clone();
                }
                if player.eos_id.is_empty() {
                    player.eos_id = s.eos_id.clone();
                }
            }
            return Ok(Some(player));
        }
        Ok(None)
    }

    /// Direct lookup by EOS identifier.  An unusable EOS resolves to nothing.
    async fn resolve_by_eos(&self, eos_id: &str) -> Result<Option<PlayerData>, StoreError> {
        if !usable_key(eos_id) {
            return Ok(None);
        }
        self.get_player(eos_id).await
    }

    /// Scan for a player whose either controller-token field matches.
    async fn resolve_by_controller(&self, token: &str) -> Result<Option<PlayerData>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let players = self.scan_players().await?;
        Ok(players
            .into_iter()
            .find(|p| p.player_controller == token || p.controller == token))
    }

    /// Teamkill iff both sides resolve, team IDs are equal and non-empty,
    /// and the EOS IDs are both non-empty and distinct (self-damage is not
    /// a teamkill).
    async fn check_teamkill(
        &self,
        victim_name: &str,
        attacker_eos: &str,
    ) -> Result<bool, StoreError> {
        let Some(victim) = self.resolve_by_name(victim_name).await? else {
            return Ok(false);
        };
        let Some(attacker) = self.resolve_by_eos(attacker_eos).await? else {
            return Ok(false);
        };
        Ok(!victim.team_id.is_empty()
            && victim.team_id == attacker.team_id
            && !victim.eos_id.is_empty()
            && !attacker.eos_id.is_empty()
            && victim.eos_id != attacker.eos_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_key_rejects_invalid_token_and_empty() {
        assert!(usable_key("0002e45a"));
        assert!(!usable_key(""));
        assert!(!usable_key("INVALID"));
        assert!(!usable_key("INVALID-0"));
    }

    #[test]
    fn session_absorb_preserves_existing_context() {
        let mut stored = SessionData {
            chain_id: "17".to_owned(),
            team_id: "2".to_owned(),
            eos_id: "E1".to_owned(),
            ..SessionData::default()
        };
        let combat = SessionData {
            time: "t9".to_owned(),
            damage: "38.5".to_owned(),
            attacker_eos: "E2".to_owned(),
            weapon: "BP_Rifle".to_owned(),
            ..SessionData::default()
        };
        stored.absorb(&combat);
        assert_eq!(stored.chain_id, "17");
        assert_eq!(stored.team_id, "2");
        assert_eq!(stored.eos_id, "E1");
        assert_eq!(stored.damage, "38.5");
        assert_eq!(stored.weapon, "BP_Rifle");
    }
}
