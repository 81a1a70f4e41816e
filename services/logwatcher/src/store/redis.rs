//! Cache-backed event store.
//!
//! A dumb KV adapter over Redis: every record is one JSON value under a
//! namespaced key, multi-record scans use `SCAN MATCH`, and category
//! lifetimes are expressed as key TTLs.  All correlation logic stays in the
//! shared [`EventStore`](super::EventStore) helpers.
//!
//! # Key schema
//!
//! | Key | Value | TTL |
//! |---|---|---|
//! | `squad-aegis:{server}:player:{id}` | `PlayerData` JSON | none |
//! | `squad-aegis:{server}:session:{name}` | `SessionData` JSON | 24 h |
//! | `squad-aegis:{server}:joinreq:{chain}` | `JoinRequestData` JSON | 1 h |
//! | `squad-aegis:{server}:disconnected:{id}` | `"1"` | 24 h |
//! | `squad-aegis:{server}:round:winner` / `:round:loser` | `TicketOutcome` JSON | 2 h |
//! | `squad-aegis:{server}:won` | `WonData` JSON | 2 h |
//!
//! Consume-on-read is GET followed by DEL.  Single-key operations are
//! atomic on the server; the GET/DEL pair is not, so two racing consumers
//! can in rare cases both observe a value.  The in-memory backend is the
//! authoritative semantics; this weakening is accepted for the cache.

use super::{EventStore, JoinRequestData, SessionData, StoreError, WonData, usable_key};
use aegis_events::{PlayerData, TicketOutcome};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

const SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const JOIN_REQUEST_TTL_SECS: u64 = 60 * 60;
const DISCONNECTED_TTL_SECS: u64 = 24 * 60 * 60;
const ROUND_TTL_SECS: u64 = 2 * 60 * 60;

/// Cache-backed store for one server.
pub struct RedisStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis and bind this store to `server_id`'s namespace.
    pub async fn connect(url: &str, server_id: Uuid) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(backend_err)?;
        Ok(RedisStore {
            manager,
            prefix: key_prefix(server_id),
        })
    }

    fn key(&self, category: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, category, id)
    }

    fn slot_key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut con = self.manager.clone();
        let value: Option<String> = con.get(key).await.map_err(backend_err)?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut con = self.manager.clone();
        match ttl_secs {
            Some(secs) => {
                let _: () = con.set_ex(key, json, secs).await.map_err(backend_err)?;
            }
            None => {
                let _: () = con.set(key, json).await.map_err(backend_err)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: () = con.del(key).await.map_err(backend_err)?;
        Ok(())
    }

    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        // GET then DEL; not atomic across the pair (documented above).
        let value = self.get_json::<T>(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.manager.clone();
        let mut iter = con
            .scan_match::<_, String>(pattern)
            .await
            .map_err(backend_err)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

fn key_prefix(server_id: Uuid) -> String {
    format!("squad-aegis:{server_id}")
}

fn backend_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl EventStore for RedisStore {
    async fn store_join_request(&self, request: JoinRequestData) -> Result<(), StoreError> {
        if request.chain_id.is_empty() {
            return Ok(());
        }
        let key = self.key("joinreq", &request.chain_id);
        self.set_json(&key, &request, Some(JOIN_REQUEST_TTL_SECS)).await
    }

    async fn take_join_request(
        &self,
        chain_id: &str,
    ) -> Result<Option<JoinRequestData>, StoreError> {
        self.take_json(&self.key("joinreq", chain_id)).await
    }

    async fn store_player(&self, key: &str, data: PlayerData) -> Result<(), StoreError> {
        if !usable_key(key) {
            return Ok(());
        }
        let key = self.key("player", key);
        let mut merged: PlayerData = self.get_json(&key).await?.unwrap_or_default();
        merged.absorb(&data);
        self.set_json(&key, &merged, None).await
    }

    async fn get_player(&self, key: &str) -> Result<Option<PlayerData>, StoreError> {
        self.get_json(&self.key("player", key)).await
    }

    async fn remove_player(&self, key: &str) -> Result<(), StoreError> {
        self.delete(&self.key("player", key)).await
    }

    async fn scan_players(&self) -> Result<Vec<PlayerData>, StoreError> {
        let keys = self.scan_keys(&format!("{}:player:*", self.prefix)).await?;
        let mut players = Vec::with_capacity(keys.len());
        for key in keys {
            // A key can expire between SCAN and GET; skip the hole.
            if let Some(player) = self.get_json::<PlayerData>(&key).await? {
                players.push(player);
            }
        }
        Ok(players)
    }

    async fn store_session(&self, name: &str, data: SessionData) -> Result<(), StoreError> {
        if name.is_empty() {
            return Ok(());
        }
        let key = self.key("session", name);
        let mut merged: SessionData = self.get_json(&key).await?.unwrap_or_default();
        merged.absorb(&data);
        self.set_json(&key, &merged, Some(SESSION_TTL_SECS)).await
    }

    async fn get_session(&self, name: &str) -> Result<Option<SessionData>, StoreError> {
        self.get_json(&self.key("session", name)).await
    }

    async fn mark_disconnected(&self, key: &str) -> Result<(), StoreError> {
        if !usable_key(key) {
            return Ok(());
        }
        let key = self.key("disconnected", key);
        let mut con = self.manager.clone();
        let _: () = con
            .set_ex(key, "1", DISCONNECTED_TTL_SECS)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn clear_disconnected(&self, key: &str) -> Result<(), StoreError> {
        self.delete(&self.key("disconnected", key)).await
    }

    async fn is_disconnected(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        con.exists(self.key("disconnected", key))
            .await
            .map_err(backend_err)
    }

    async fn store_round_winner(&self, outcome: TicketOutcome) -> Result<(), StoreError> {
        self.set_json(&self.slot_key("round:winner"), &outcome, Some(ROUND_TTL_SECS))
            .await
    }

    async fn store_round_loser(&self, outcome: TicketOutcome) -> Result<(), StoreError> {
        self.set_json(&self.slot_key("round:loser"), &outcome, Some(ROUND_TTL_SECS))
            .await
    }

    async fn round_winner(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError> {
        let key = self.slot_key("round:winner");
        if consume {
            self.take_json(&key).await
        } else {
            self.get_json(&key).await
        }
    }

    async fn round_loser(&self, consume: bool) -> Result<Option<TicketOutcome>, StoreError> {
        let key = self.slot_key("round:loser");
        if consume {
            self.take_json(&key).await
        } else {
            self.get_json(&key).await
        }
    }

    async fn store_won_data(&self, mut data: WonData) -> Result<(), StoreError> {
        let key = self.slot_key("won");
        if self.get_json::<WonData>(&key).await?.is_some() {
            data.winner = None;
        }
        self.set_json(&key, &data, Some(ROUND_TTL_SECS)).await
    }

    async fn take_won_data(&self) -> Result<Option<WonData>, StoreError> {
        self.take_json(&self.slot_key("won")).await
    }

    async fn clear_new_game_data(&self) -> Result<(), StoreError> {
        let mut doomed = self
            .scan_keys(&format!("{}:session:*", self.prefix))
            .await?;
        doomed.extend(
            self.scan_keys(&format!("{}:disconnected:*", self.prefix))
                .await?,
        );
        for key in doomed {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
