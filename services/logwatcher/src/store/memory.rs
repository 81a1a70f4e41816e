//! In-memory event store.
//!
//! All maps live behind a single reader/writer lock.  Contention is low
//! (one writing dispatcher per store, occasional collaborator reads) so a
//! per-map lock split is not worth the ordering questions it would raise.

use super::{EventStore, JoinRequestData, SessionData, StoreError, WonData, usable_key};
use aegis_events::{PlayerData, TicketOutcome};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
struct Maps {
    players: HashMap<String, PlayerData>,
    sessions: HashMap<String, SessionData>,
    join_requests: HashMap<String, JoinRequestData>,
    disconnected: HashSet<String>,
    round_winner: Option<TicketOutcome>,
    round_loser: Option<TicketOutcome>,
    won: Option<WonData>,
}

/// The authoritative store backend.  One instance per watched server.
#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<Maps>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn store_join_request(&self, request: JoinRequestData) -> Result<(), StoreError> {
        if request.chain_id.is_empty() {
            return Ok(());
        }
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.join_requests.insert(request.chain_id.clone(), request);
        Ok(())
    }

    async fn take_join_request(
        &self,
        chain_id: &str,
    ) -> Result<Option<JoinRequestData>, StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        Ok(maps.join_requests.remove(chain_id))
    }

    async fn store_player(&self, key: &str, data: PlayerData) -> Result<(), StoreError> {
        if !usable_key(key) {
            return Ok(());
        }
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.players.entry(key.to_owned()).or_default().absorb(&data);
        Ok(())
    }

    async fn get_player(&self, key: &str) -> Result<Option<PlayerData>, StoreError> {
        let maps = self.maps.read().expect("store lock poisoned");
        Ok(maps.players.get(key).cloned())
    }

    async fn remove_player(&self, key: &str) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.players.remove(key);
        Ok(())
    }

    async fn scan_players(&self) -> Result<Vec<PlayerData>, StoreError> {
        let maps = self.maps.read().expect("store lock poisoned");
        Ok(maps.players.values().cloned().collect())
    }

    async fn store_session(&self, name: &str, data: SessionData) -> Result<(), StoreError> {
        if name.is_empty() {
            return Ok(());
        }
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.sessions.entry(name.to_owned()).or_default().absorb(&data);
        Ok(())
    }

    async fn get_session(&self, name: &str) -> Result<Option<SessionData>, StoreError> {
        let maps = self.maps.read().expect("store lock poisoned");
        Ok(maps.sessions.get(name).cloned())
    }

    async fn mark_disconnected(&self, key: &str) -> Result<(), StoreError> {
        if !usable_key(key) {
            return Ok(());
        }
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.disconnected.insert(key.to_owned());
        Ok(())
    }

    async fn clear_disconnected(&self, key: &str) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.disconnected.remove(key);
        Ok(())
    }

    async fn is_disconnected(&self, key: &str) -> Result<bool, StoreError> {
        let maps = self.maps.read().expect("store lock poisoned");
        Ok(maps.disconnected.contains(key))
    }

    async fn store_round_winner(&self, outcome: TicketOutcome) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.round_winner = Some(outcome);
        Ok(())
    }

    async fn store_round_loser(&self, outcome: TicketOutcome) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.round_loser = Some(outcome);
        Ok(())
    }

    async fn round_winner(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        if consume {
            Ok(maps.round_winner.take())
        } else {
            Ok(maps.round_winner.clone())
        }
    }

    async fn round_loser(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        if consume {
            Ok(maps.round_loser.take())
        } else {
            Ok(maps.round_loser.clone())
        }
    }

    async fn store_won_data(&self, mut data: WonData) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        // Two announcements for one boundary: the winner is disputed, so the
        // stored record keeps the newer fields with the winner unknown.
        if maps.won.is_some() {
            data.winner = None;
        }
        maps.won = Some(data);
        Ok(())
    }

    async fn take_won_data(&self) -> Result<Option<WonData>, StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        Ok(maps.won.take())
    }

    async fn clear_new_game_data(&self) -> Result<(), StoreError> {
        let mut maps = self.maps.write().expect("store lock poisoned");
        maps.sessions.clear();
        maps.disconnected.clear();
        Ok(())
    }
}
